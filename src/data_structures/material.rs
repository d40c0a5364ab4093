//! Panel materials, texture bindings and the original-material side table.
//!
//! A [`Material`] is plain CPU state; the renderer turns it into a bind group
//! whenever the owning panel is marked dirty. Cloning a material yields a new
//! instance with its own [`MaterialId`], which is what the per-panel
//! clone-on-write relies on.

use std::{
    collections::HashMap,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::cache::TextureResource;

static NEXT_MATERIAL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one material instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u64);

impl MaterialId {
    fn next() -> Self {
        Self(NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The texture fields of a material that a selection can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapSlot {
    Color,
    Normal,
    Roughness,
}

impl MapSlot {
    pub const ALL: [MapSlot; 3] = [MapSlot::Color, MapSlot::Normal, MapSlot::Roughness];

    pub fn index(self) -> usize {
        match self {
            MapSlot::Color => 0,
            MapSlot::Normal => 1,
            MapSlot::Roughness => 2,
        }
    }
}

/// Placement of a texture on the surface: offset, repeat, rotation (radians)
/// around `center`, all in UV space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UvTransform {
    pub offset: [f32; 2],
    pub repeat: [f32; 2],
    pub center: [f32; 2],
    pub rotation: f32,
}

impl Default for UvTransform {
    fn default() -> Self {
        Self {
            offset: [0.0, 0.0],
            repeat: [1.0, 1.0],
            center: [0.0, 0.0],
            rotation: 0.0,
        }
    }
}

impl UvTransform {
    /// From a `KHR_texture_transform` extension.
    pub fn from_khr(offset: [f32; 2], rotation: f32, scale: [f32; 2]) -> Self {
        Self {
            offset,
            repeat: scale,
            rotation,
            ..Default::default()
        }
    }

    /// The 3x3 UV matrix used by the shader.
    pub fn to_matrix(&self) -> cgmath::Matrix3<f32> {
        let (s, c) = self.rotation.sin_cos();
        let [tx, ty] = self.offset;
        let [sx, sy] = self.repeat;
        let [cx, cy] = self.center;
        // column major
        cgmath::Matrix3::new(
            sx * c,
            -sy * s,
            0.0,
            sx * s,
            sy * c,
            0.0,
            -sx * (c * cx + s * cy) + cx + tx,
            -sy * (-s * cx + c * cy) + cy + ty,
            1.0,
        )
    }
}

/// A texture resource as used by one material, together with its UV placement.
pub struct TextureBinding<T> {
    pub resource: Rc<TextureResource<T>>,
    pub transform: UvTransform,
}

impl<T> TextureBinding<T> {
    pub fn new(resource: Rc<TextureResource<T>>) -> Self {
        Self {
            resource,
            transform: UvTransform::default(),
        }
    }

    pub fn with_transform(resource: Rc<TextureResource<T>>, transform: UvTransform) -> Self {
        Self {
            resource,
            transform,
        }
    }

    pub fn url(&self) -> &str {
        self.resource.url()
    }
}

impl<T> Clone for TextureBinding<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            transform: self.transform,
        }
    }
}

impl<T> std::fmt::Debug for TextureBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureBinding")
            .field("url", &self.url())
            .field("transform", &self.transform)
            .finish()
    }
}

/// Metallic-roughness surface description of one panel.
pub struct Material<T> {
    id: MaterialId,
    pub name: String,
    pub base_color: [f32; 4],
    pub roughness: f32,
    pub metalness: f32,
    pub env_map_intensity: f32,
    maps: [Option<TextureBinding<T>>; 3],
}

impl<T> Material<T> {
    /// A material with the glTF default factors and no maps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MaterialId::next(),
            name: name.into(),
            base_color: [1.0; 4],
            roughness: 1.0,
            metalness: 1.0,
            env_map_intensity: 1.0,
            maps: [None, None, None],
        }
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }

    pub fn map(&self, slot: MapSlot) -> Option<&TextureBinding<T>> {
        self.maps[slot.index()].as_ref()
    }

    pub fn set_map(&mut self, slot: MapSlot, binding: Option<TextureBinding<T>>) {
        self.maps[slot.index()] = binding;
    }

    /// URL of the texture currently bound to `slot`.
    pub fn applied_url(&self, slot: MapSlot) -> Option<&str> {
        self.map(slot).map(TextureBinding::url)
    }

    pub fn references(&self, url: &str) -> bool {
        MapSlot::ALL
            .iter()
            .any(|slot| self.applied_url(*slot) == Some(url))
    }
}

impl<T> Clone for Material<T> {
    /// Deep copy with a fresh identity. Texture resources stay shared.
    fn clone(&self) -> Self {
        Self {
            id: MaterialId::next(),
            name: self.name.clone(),
            base_color: self.base_color,
            roughness: self.roughness,
            metalness: self.metalness,
            env_map_intensity: self.env_map_intensity,
            maps: self.maps.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Material<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_color", &self.base_color)
            .field("roughness", &self.roughness)
            .field("metalness", &self.metalness)
            .field("env_map_intensity", &self.env_map_intensity)
            .field("maps", &self.maps)
            .finish()
    }
}

/// Materials as they were when the scene finished loading, keyed by identity.
///
/// Entries are written once and never mutated. The table belongs to one scene
/// and is cleared when that scene is torn down.
pub struct OriginalMaterials<T> {
    originals: HashMap<MaterialId, Rc<Material<T>>>,
}

impl<T> OriginalMaterials<T> {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    /// Record `material` as an original. Returns `false` if it was already captured.
    pub fn capture(&mut self, material: &Rc<Material<T>>) -> bool {
        if self.originals.contains_key(&material.id()) {
            return false;
        }
        self.originals.insert(material.id(), material.clone());
        true
    }

    pub fn get(&self, id: MaterialId) -> Option<&Rc<Material<T>>> {
        self.originals.get(&id)
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    pub fn clear(&mut self) {
        self.originals.clear();
    }
}

impl<T> Default for OriginalMaterials<T> {
    fn default() -> Self {
        Self::new()
    }
}
