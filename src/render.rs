//! Drawing the panels of a scene, to the window or to an offscreen still.
//!
//! [`SceneRenderer`] mirrors every [`MeshPanel`] with its GPU buffers and a
//! material bind group. Only panels flagged dirty get a new uniform and bind
//! group on [`SceneRenderer::sync`], so a texture arriving for one panel leaves
//! the others untouched.

use std::{iter, rc::Rc, time::Duration};

use anyhow::Context as _;
use futures::FutureExt;
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::{
    capture::{CaptureTarget, RenderSettings},
    context::Context,
    data_structures::{
        material::{MapSlot, Material},
        model::{DrawPanel, PanelMesh, PanelUniform},
        scene::{MeshPanel, SceneAsset},
        texture::Texture,
    },
};

struct PanelGpu {
    mesh: PanelMesh,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// GPU mirror of one [`SceneAsset`], in the same panel order.
pub struct SceneRenderer {
    panels: Vec<PanelGpu>,
}

impl SceneRenderer {
    pub fn new(ctx: &Context, scene: &mut SceneAsset<Texture>) -> Self {
        let group = scene.group().to_matrix();
        let panels = scene
            .panels_mut()
            .iter_mut()
            .map(|panel| {
                panel.take_dirty();
                let mesh = PanelMesh::new(&ctx.device, panel.name(), panel.geometry());
                let uniform = PanelUniform::new(group * panel.geometry().world, panel.material());
                let uniform_buffer =
                    ctx.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some(&format!("{:?} Panel Buffer", panel.name())),
                            contents: bytemuck::cast_slice(&[uniform]),
                            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        });
                let bind_group = material_bind_group(ctx, &uniform_buffer, panel);
                PanelGpu {
                    mesh,
                    uniform_buffer,
                    bind_group,
                }
            })
            .collect();
        Self { panels }
    }

    /// Push the material state of every dirty panel to the GPU. Returns how many
    /// panels were rebound.
    pub fn sync(&mut self, ctx: &Context, scene: &mut SceneAsset<Texture>) -> usize {
        let group = scene.group().to_matrix();
        let mut rebound = 0;
        for (panel, gpu) in scene.panels_mut().iter_mut().zip(self.panels.iter_mut()) {
            if !panel.take_dirty() {
                continue;
            }
            let uniform = PanelUniform::new(group * panel.geometry().world, panel.material());
            ctx.queue
                .write_buffer(&gpu.uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));
            gpu.bind_group = material_bind_group(ctx, &gpu.uniform_buffer, panel);
            rebound += 1;
        }
        rebound
    }

    pub fn draw(&self, ctx: &Context, render_pass: &mut wgpu::RenderPass<'_>) {
        render_pass.set_pipeline(&ctx.pipeline);
        for panel in &self.panels {
            if panel.mesh.num_elements == 0 {
                continue;
            }
            render_pass.draw_panel(
                &panel.mesh,
                &panel.bind_group,
                &ctx.camera.bind_group,
                &ctx.light.bind_group,
            );
        }
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}

/// Bind the panel's maps, falling back to the neutral textures for empty or
/// still loading slots.
fn material_bind_group(
    ctx: &Context,
    uniform_buffer: &wgpu::Buffer,
    panel: &MeshPanel<Texture>,
) -> wgpu::BindGroup {
    let material = panel.material();
    let color = loaded(material, MapSlot::Color);
    let normal = loaded(material, MapSlot::Normal);
    let roughness = loaded(material, MapSlot::Roughness);
    let view = |texture: &Option<Rc<Texture>>, fallback: &Texture| {
        texture.as_ref().map(|t| t.view.clone()).unwrap_or_else(|| fallback.view.clone())
    };
    let color = view(&color, &ctx.fallbacks.color);
    let normal = view(&normal, &ctx.fallbacks.normal);
    let roughness = view(&roughness, &ctx.fallbacks.roughness);

    ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout: &ctx.material_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&color),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(&normal),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(&roughness),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::Sampler(&ctx.sampler),
            },
        ],
        label: Some(&format!("{:?} material_bind_group", panel.name())),
    })
}

fn loaded(material: &Material<Texture>, slot: MapSlot) -> Option<Rc<Texture>> {
    material
        .map(slot)
        .and_then(|binding| binding.resource.texture())
}

fn encode_pass(
    ctx: &Context,
    encoder: &mut wgpu::CommandEncoder,
    target: &wgpu::TextureView,
    depth: &wgpu::TextureView,
    renderer: Option<&SceneRenderer>,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Render Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(ctx.clear_colour),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: depth,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    if let Some(renderer) = renderer {
        renderer.draw(ctx, &mut render_pass);
    }
}

/// Draw one frame to the window. Without a renderer (model still loading) the
/// frame is just cleared.
pub fn render_frame(
    ctx: &mut Context,
    renderer: Option<&SceneRenderer>,
) -> Result<(), wgpu::SurfaceError> {
    ctx.camera.write(&ctx.queue);
    let output = ctx.surface.get_current_texture()?;
    let view = output
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });
    encode_pass(ctx, &mut encoder, &view, &ctx.depth_texture.view, renderer);
    ctx.queue.submit(iter::once(encoder.finish()));
    output.present();
    Ok(())
}

/// The live renderer seen through [`CaptureTarget`]: stills are drawn offscreen
/// with the same camera, lights and materials as the window.
pub struct Stage<'a> {
    pub ctx: &'a mut Context,
    pub renderer: &'a SceneRenderer,
}

impl CaptureTarget for Stage<'_> {
    fn settings(&self) -> RenderSettings {
        self.ctx.settings
    }

    fn apply_settings(&mut self, settings: RenderSettings) -> anyhow::Result<()> {
        if !(settings.width > 0.0 && settings.height > 0.0) {
            anyhow::bail!("render size {}x{} is empty", settings.width, settings.height);
        }
        if !(settings.pixel_density > 0.0) {
            anyhow::bail!("pixel density {} is not positive", settings.pixel_density);
        }
        self.ctx.settings = settings;
        let (width, height) = settings.physical_size();
        self.ctx.camera.camera.resize(width, height);
        self.ctx.camera.write(&self.ctx.queue);
        Ok(())
    }

    fn render_still(&mut self) -> anyhow::Result<RgbaImage> {
        let ctx = &*self.ctx;
        let (width, height) = ctx.settings.physical_size();
        let limit = ctx.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            anyhow::bail!("capture of {width}x{height} exceeds the device limit of {limit}");
        }

        let format = ctx.config.format;
        let target = Texture::create_render_target(&ctx.device, [width, height], format, "capture");
        let depth = Texture::create_depth_texture(&ctx.device, [width, height], "capture_depth");

        let u32_size = std::mem::size_of::<u32>() as u32;
        let unpadded_bytes_per_row = u32_size * width;
        let padded_bytes_per_row = unpadded_bytes_per_row
            .div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let output_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            label: Some("capture readback"),
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Capture Encoder"),
            });
        encode_pass(ctx, &mut encoder, &target.view, &depth.view, Some(self.renderer));
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let submission = ctx.queue.submit(iter::once(encoder.finish()));

        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        let buffer_slice = output_buffer.slice(..);
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        ctx.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: Some(Duration::from_secs(3)),
            })
            .map_err(|err| anyhow::anyhow!("waiting for the capture failed: {err}"))?;
        // The wait above has run the map callback, unless the backend cannot block
        rx.receive()
            .now_or_never()
            .flatten()
            .context("capture readback is not ready")?
            .context("could not map the capture buffer")?;

        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks(padded_bytes_per_row as usize) {
                pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
            }
        }
        output_buffer.unmap();

        if matches!(
            format,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        ) {
            pixels.chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
        }
        RgbaImage::from_raw(width, height, pixels).context("capture has the wrong size")
    }
}
