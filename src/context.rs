use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::{
    camera::{CameraResources, CameraUniform, OrbitCamera, OrbitController},
    capture::RenderSettings,
    config::ViewerConfig,
    data_structures::texture::{self, Texture, create_default_sampler},
    pipelines::{
        basic::mk_panel_pipeline,
        light::{LightResources, LightUniform},
    },
};

/// Neutral textures bound where a material has no map (or its map is still loading).
#[derive(Debug)]
pub struct Fallbacks {
    pub color: Texture,
    pub normal: Texture,
    pub roughness: Texture,
}

impl Fallbacks {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self {
            color: Texture::solid(device, queue, [255, 255, 255, 255], "fallback color map"),
            // The blue/purple-ish colour that represents the default for normal maps
            normal: Texture::solid(device, queue, [128, 128, 255, 255], "fallback normal map"),
            roughness: Texture::solid(device, queue, [255, 255, 255, 255], "fallback roughness map"),
        }
    }
}

/// GPU and window state shared by everything that draws.
#[derive(Debug)]
pub struct Context {
    pub window: Arc<Window>,
    pub(crate) depth_texture: texture::Texture,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub camera: CameraResources,
    pub light: LightResources,
    pub pipeline: wgpu::RenderPipeline,
    pub material_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    pub fallbacks: Fallbacks,
    pub clear_colour: wgpu::Color,
    /// Logical size, pixel density and XR state the frame is rendered with.
    pub settings: RenderSettings,
    device_lost: Arc<Mutex<Option<String>>>,
}

impl Context {
    pub async fn new(window: Arc<Window>, viewer: &ViewerConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();

        log::info!("WGPU setup");
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            #[cfg(not(target_arch = "wasm32"))]
            backends: wgpu::Backends::PRIMARY,
            #[cfg(target_arch = "wasm32")]
            backends: wgpu::Backends::GL,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("could not create a surface for the window")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no suitable graphics adapter")?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                // WebGL doesn't support all of wgpu's features, so if
                // we're building for the web we'll have to disable some.
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
            })
            .await
            .context("could not open the graphics device")?;

        let device_lost = Arc::new(Mutex::new(None));
        {
            let device_lost = device_lost.clone();
            device.set_device_lost_callback(move |reason, message| {
                if let Ok(mut lost) = device_lost.lock() {
                    *lost = Some(format!("{reason:?}: {message}"));
                }
            });
        }

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface supports no formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let settings =
            RenderSettings::from_physical(config.width, config.height, window.scale_factor(), false);

        let camera = OrbitCamera::from_config(&viewer.camera, config.width, config.height);
        let mut camera_uniform = CameraUniform::new();
        camera_uniform.update_view_proj(&camera);

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[camera_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
                label: Some("camera_bind_group_layout"),
            });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        let camera = CameraResources {
            camera,
            controller: OrbitController::new(0.008, 0.1),
            uniform: camera_uniform,
            buffer: camera_buffer,
            bind_group: camera_bind_group,
            bind_group_layout: camera_bind_group_layout,
        };

        let light = LightResources::new(
            &device,
            LightUniform::studio(viewer.exposure, !surface_format.is_srgb()),
        );

        let (pipeline, material_layout) = mk_panel_pipeline(
            &device,
            surface_format,
            &camera.bind_group_layout,
            &light.bind_group_layout,
        );

        let depth_texture =
            Texture::create_depth_texture(&device, [config.width, config.height], "depth_texture");
        let sampler = create_default_sampler(&device);
        let fallbacks = Fallbacks::new(&device, &queue);
        let [r, g, b, a] = viewer.clear_colour;

        let ctx = Self {
            window,
            depth_texture,
            surface,
            device,
            queue,
            config,
            camera,
            light,
            pipeline,
            material_layout,
            sampler,
            fallbacks,
            clear_colour: wgpu::Color { r, g, b, a },
            settings,
            device_lost,
        };
        ctx.surface.configure(&ctx.device, &ctx.config);
        Ok(ctx)
    }

    /// Reconfigure the surface for a new physical window size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth_texture =
            Texture::create_depth_texture(&self.device, [width, height], "depth_texture");
        self.settings = RenderSettings::from_physical(
            width,
            height,
            self.window.scale_factor(),
            self.settings.xr_enabled,
        );
        self.camera.camera.resize(width, height);
    }

    /// Set when the GPU device went away; the viewer cannot continue on it.
    pub fn device_lost(&self) -> Option<String> {
        self.device_lost.lock().ok().and_then(|lost| lost.clone())
    }
}
