//! The panel list handed to panel pickers.

use std::{collections::BTreeSet, rc::Rc};

use crate::data_structures::scene::{AssetId, SceneAsset};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanelInfo {
    pub name: String,
    pub material: String,
}

/// Flattens a scene into its panels and keeps the result stable.
///
/// The list is only rebuilt when the scene identity changes, and a rebuilt list
/// with the same set of names is thrown away in favour of the previous one. Callers
/// can compare with [`Rc::ptr_eq`] to find out whether anything changed.
#[derive(Default)]
pub struct Introspector {
    asset: Option<AssetId>,
    panels: Rc<Vec<PanelInfo>>,
}

impl Introspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traverse<T>(&mut self, scene: &SceneAsset<T>) -> Rc<Vec<PanelInfo>> {
        if self.asset == Some(scene.id()) {
            return self.panels.clone();
        }
        self.asset = Some(scene.id());

        let panels: Vec<PanelInfo> = scene
            .panels()
            .iter()
            .map(|panel| PanelInfo {
                name: panel.name().to_string(),
                material: panel.material().name.clone(),
            })
            .collect();

        if names(&panels) != names(&self.panels) {
            log::info!("Scene {} has {} panels", scene.url(), panels.len());
            self.panels = Rc::new(panels);
        }
        self.panels.clone()
    }

    /// The last list returned by [`traverse`](Self::traverse).
    pub fn panels(&self) -> Rc<Vec<PanelInfo>> {
        self.panels.clone()
    }
}

fn names(panels: &[PanelInfo]) -> BTreeSet<&str> {
    panels.iter().map(|panel| panel.name.as_str()).collect()
}
