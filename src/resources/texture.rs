use futures::future::LocalBoxFuture;
use image::RgbaImage;

use crate::{cache::TextureLoader, data_structures::texture::Texture, resources::Loads};

/// Bind group layout of one panel: its uniform, the three maps and the sampler.
pub fn panel_material_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let map = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            map(1),
            map(2),
            map(3),
            wgpu::BindGroupLayoutEntry {
                binding: 4,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
        label: Some("panel_material_bind_group_layout"),
    })
}

/// Fetches texture images by URL and uploads them to the GPU.
///
/// Fetch and decode happen off the render thread on native targets; `upload`
/// runs on the thread that pumps the cache.
pub struct WgpuTextureLoader {
    device: wgpu::Device,
    queue: wgpu::Queue,
    loads: Loads,
}

impl WgpuTextureLoader {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, loads: Loads) -> Self {
        Self {
            device,
            queue,
            loads,
        }
    }

    pub fn upload_image(&self, label: &str, image: &RgbaImage) -> Texture {
        Texture::from_rgba(&self.device, &self.queue, image, Some(label))
    }
}

impl TextureLoader for WgpuTextureLoader {
    type Decoded = RgbaImage;
    type Texture = Texture;

    fn decode(&self, url: &str) -> LocalBoxFuture<'static, anyhow::Result<RgbaImage>> {
        self.loads
            .fetch_and_decode(url, |bytes| Ok(image::load_from_memory(&bytes)?.to_rgba8()))
    }

    fn upload(&self, url: &str, decoded: RgbaImage) -> anyhow::Result<Texture> {
        if decoded.width() == 0 || decoded.height() == 0 {
            anyhow::bail!("image is empty");
        }
        let limit = self.device.limits().max_texture_dimension_2d;
        if decoded.width() > limit || decoded.height() > limit {
            anyhow::bail!(
                "image is {}x{}, the device allows at most {limit}",
                decoded.width(),
                decoded.height()
            );
        }
        Ok(self.upload_image(url, &decoded))
    }
}
