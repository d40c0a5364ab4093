use cgmath::{InnerSpace, Vector3};
use wgpu::util::DeviceExt;

/// Ambient light, three directional lights and the output transform.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniform {
    /// rgb premultiplied by intensity
    pub ambient: [f32; 4],
    /// Unit vectors pointing towards each light.
    pub directions: [[f32; 4]; 3],
    /// rgb premultiplied by intensity
    pub colors: [[f32; 4]; 3],
    /// x: exposure, y: 1 if the shader has to encode sRGB itself
    pub output: [f32; 4],
}

impl LightUniform {
    /// The studio rig: dim ambient, a key light and two fills.
    pub fn studio(exposure: f32, encode_srgb: bool) -> Self {
        let light = |position: [f32; 3]| {
            let dir = Vector3::from(position).normalize();
            [dir.x, dir.y, dir.z, 0.0]
        };
        let white = |intensity: f32| [intensity, intensity, intensity, 0.0];
        Self {
            ambient: white(0.2),
            directions: [light([5.0, 8.0, 5.0]), light([-5.0, 3.0, 5.0]), light([0.0, 5.0, -6.0])],
            colors: [white(1.6), white(0.6), white(0.8)],
            output: [exposure, if encode_srgb { 1.0 } else { 0.0 }, 0.0, 0.0],
        }
    }
}

#[derive(Debug)]
pub struct LightResources {
    pub uniform: LightUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl LightResources {
    pub fn new(device: &wgpu::Device, uniform: LightUniform) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Light Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group_layout = mk_bind_group_layout(device);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
            label: Some("light_bind_group"),
        });
        Self {
            uniform,
            buffer,
            bind_group,
            bind_group_layout,
        }
    }

    pub fn write(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[self.uniform]));
    }
}

pub fn mk_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
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
        label: Some("light_bind_group_layout"),
    })
}
