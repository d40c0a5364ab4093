//! GPU-side mesh data of a panel.

use cgmath::{Matrix, Matrix4, SquareMatrix};
use wgpu::util::DeviceExt;

use crate::data_structures::{
    material::{MapSlot, Material},
    scene::PanelGeometry,
};

pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PanelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
}

impl Vertex for PanelVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<PanelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// Vertex and index buffers of one panel.
#[derive(Debug)]
pub struct PanelMesh {
    pub name: String,
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub num_elements: u32,
}

impl PanelMesh {
    pub fn new(device: &wgpu::Device, name: &str, geometry: &PanelGeometry) -> Self {
        let vertices: Vec<PanelVertex> = geometry
            .positions
            .iter()
            .enumerate()
            .map(|(i, position)| PanelVertex {
                position: *position,
                tex_coords: geometry.tex_coords.get(i).copied().unwrap_or_default(),
                normal: geometry.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
                tangent: geometry
                    .tangents
                    .get(i)
                    .copied()
                    .unwrap_or([1.0, 0.0, 0.0, 1.0]),
            })
            .collect();

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Vertex Buffer", name)),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Index Buffer", name)),
            contents: bytemuck::cast_slice(&geometry.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            num_elements: geometry.indices.len() as u32,
        }
    }
}

/// Per-panel uniform: transforms, material factors and the UV matrix of each map.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PanelUniform {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    /// roughness, metalness, env intensity, unused
    pub params: [f32; 4],
    /// One mat3x3 per map slot, columns padded to 16 bytes as WGSL wants them.
    pub uv: [[[f32; 4]; 3]; 3],
}

impl PanelUniform {
    pub fn new<T>(model: Matrix4<f32>, material: &Material<T>) -> Self {
        let normal = model
            .invert()
            .map(|inverse| inverse.transpose())
            .unwrap_or(model);
        let mut uv = [[[0.0; 4]; 3]; 3];
        for slot in MapSlot::ALL {
            let matrix = material
                .map(slot)
                .map(|binding| binding.transform.to_matrix())
                .unwrap_or_else(cgmath::Matrix3::identity);
            for (column, dst) in [matrix.x, matrix.y, matrix.z]
                .into_iter()
                .zip(uv[slot.index()].iter_mut())
            {
                *dst = [column.x, column.y, column.z, 0.0];
            }
        }
        Self {
            model: model.into(),
            normal: normal.into(),
            base_color: material.base_color,
            params: [
                material.roughness,
                material.metalness,
                material.env_map_intensity,
                0.0,
            ],
            uv,
        }
    }
}

pub trait DrawPanel {
    fn draw_panel(
        &mut self,
        mesh: &PanelMesh,
        material: &wgpu::BindGroup,
        camera_bind_group: &wgpu::BindGroup,
        light_bind_group: &wgpu::BindGroup,
    );
}

impl DrawPanel for wgpu::RenderPass<'_> {
    fn draw_panel(
        &mut self,
        mesh: &PanelMesh,
        material: &wgpu::BindGroup,
        camera_bind_group: &wgpu::BindGroup,
        light_bind_group: &wgpu::BindGroup,
    ) {
        self.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        self.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        self.set_bind_group(0, material, &[]);
        self.set_bind_group(1, camera_bind_group, &[]);
        self.set_bind_group(2, light_bind_group, &[]);
        self.draw_indexed(0..mesh.num_elements, 0, 0..1);
    }
}
