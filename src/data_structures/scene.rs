//! The loaded model as a flat set of named, texturable panels.

use std::{
    collections::HashMap,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use cgmath::{Matrix4, Point3, SquareMatrix, Transform};

use crate::data_structures::{
    bounds::GroupTransform,
    material::{Material, MaterialId},
};

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one loaded scene. A reload of the same URL gets a new id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AssetId(u64);

/// CPU-side vertex data of one panel in model space.
#[derive(Clone, Debug)]
pub struct PanelGeometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub tangents: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
    /// Accumulated node transform inside the scene file.
    pub world: Matrix4<f32>,
}

impl PanelGeometry {
    pub fn from_positions(positions: Vec<[f32; 3]>) -> Self {
        Self {
            positions,
            normals: Vec::new(),
            tex_coords: Vec::new(),
            tangents: Vec::new(),
            indices: Vec::new(),
            world: Matrix4::identity(),
        }
    }

    /// Vertex positions after the node transform.
    pub fn world_positions(&self) -> impl Iterator<Item = Point3<f32>> + '_ {
        self.positions
            .iter()
            .map(|p| self.world.transform_point(Point3::from(*p)))
    }
}

/// A named mesh region holding exactly one material.
///
/// The material is reference counted: right after loading it is shared with the
/// [`OriginalMaterials`](crate::data_structures::material::OriginalMaterials)
/// table, and the first write through [`MeshPanel::material_mut`] gives the panel
/// its own copy.
pub struct MeshPanel<T> {
    name: String,
    geometry: Rc<PanelGeometry>,
    material: Rc<Material<T>>,
    origin: MaterialId,
    dirty: bool,
}

impl<T> MeshPanel<T> {
    pub fn new(name: impl Into<String>, geometry: Rc<PanelGeometry>, material: Material<T>) -> Self {
        Self {
            name: name.into(),
            geometry,
            origin: material.id(),
            material: Rc::new(material),
            dirty: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &PanelGeometry {
        &self.geometry
    }

    pub fn material(&self) -> &Material<T> {
        &self.material
    }

    pub fn material_rc(&self) -> &Rc<Material<T>> {
        &self.material
    }

    /// Identity of the material the panel was loaded with.
    pub fn origin(&self) -> MaterialId {
        self.origin
    }

    /// `true` while the panel shows something other than its original material.
    pub fn is_customized(&self) -> bool {
        self.material.id() != self.origin
    }

    /// Write access to the panel's material, cloning it first if it is shared.
    pub fn material_mut(&mut self) -> &mut Material<T> {
        self.dirty = true;
        Rc::make_mut(&mut self.material)
    }

    /// Swap back to `original`, dropping the panel's own copy. Returns `false`
    /// when the panel already shows it.
    pub fn restore(&mut self, original: &Rc<Material<T>>) -> bool {
        if Rc::ptr_eq(&self.material, original) {
            return false;
        }
        self.material = original.clone();
        self.dirty = true;
        true
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear and return the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

/// A loaded model, exclusively owned by one viewer.
pub struct SceneAsset<T> {
    id: AssetId,
    url: String,
    panels: Vec<MeshPanel<T>>,
    index: HashMap<String, usize>,
    group: GroupTransform,
}

impl<T> SceneAsset<T> {
    /// Panel names must be unique; later duplicates get a `_<n>` suffix.
    pub fn new(url: impl Into<String>, panels: Vec<MeshPanel<T>>) -> Self {
        let mut index = HashMap::with_capacity(panels.len());
        let mut panels = panels;
        for (idx, panel) in panels.iter_mut().enumerate() {
            if index.contains_key(&panel.name) {
                let name = unique_name(&panel.name, &index);
                log::warn!("Duplicate panel name {}, renamed to {}", panel.name, name);
                panel.name = name;
            }
            index.insert(panel.name.clone(), idx);
        }
        Self {
            id: AssetId(NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed)),
            url: url.into(),
            panels,
            index,
            group: GroupTransform::default(),
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn panels(&self) -> &[MeshPanel<T>] {
        &self.panels
    }

    pub fn panels_mut(&mut self) -> &mut [MeshPanel<T>] {
        &mut self.panels
    }

    pub fn panel(&self, name: &str) -> Option<&MeshPanel<T>> {
        self.index.get(name).map(|&idx| &self.panels[idx])
    }

    pub fn panel_mut(&mut self, name: &str) -> Option<&mut MeshPanel<T>> {
        self.index.get(name).map(|&idx| &mut self.panels[idx])
    }

    pub fn group(&self) -> GroupTransform {
        self.group
    }

    pub fn set_group(&mut self, group: GroupTransform) {
        self.group = group;
        self.panels.iter_mut().for_each(MeshPanel::mark_dirty);
    }

    /// Mark every panel whose material uses `url` for a rebind.
    pub fn mark_dirty_referencing(&mut self, url: &str) -> usize {
        let mut marked = 0;
        for panel in self.panels.iter_mut() {
            if panel.material().references(url) {
                panel.mark_dirty();
                marked += 1;
            }
        }
        marked
    }
}

pub(crate) fn unique_name<V>(name: &str, taken: &HashMap<String, V>) -> String {
    (1..)
        .map(|n| format!("{name}_{n}"))
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or_else(|| name.to_string())
}
