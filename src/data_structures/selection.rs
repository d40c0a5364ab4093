//! The user's per-panel texture choice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data_structures::material::MapSlot;

/// Texture URLs chosen for one panel. Any field may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PanelSelection {
    pub color_url: Option<String>,
    pub normal_url: Option<String>,
    pub roughness_url: Option<String>,
}

impl PanelSelection {
    pub fn color(url: impl Into<String>) -> Self {
        Self {
            color_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn url(&self, slot: MapSlot) -> Option<&str> {
        match slot {
            MapSlot::Color => self.color_url.as_deref(),
            MapSlot::Normal => self.normal_url.as_deref(),
            MapSlot::Roughness => self.roughness_url.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        MapSlot::ALL.iter().all(|slot| self.url(*slot).is_none())
    }
}

/// Panel name to selection. Partial maps are fine and names that match no panel
/// are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionMap(BTreeMap<String, PanelSelection>);

impl SelectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with(mut self, panel: impl Into<String>, selection: PanelSelection) -> Self {
        self.insert(panel, selection);
        self
    }

    pub fn insert(&mut self, panel: impl Into<String>, selection: PanelSelection) {
        self.0.insert(panel.into(), selection);
    }

    pub fn remove(&mut self, panel: &str) -> Option<PanelSelection> {
        self.0.remove(panel)
    }

    pub fn get(&self, panel: &str) -> Option<&PanelSelection> {
        self.0.get(panel)
    }

    /// The URL targeted for `slot` on `panel`, if any.
    pub fn target(&self, panel: &str, slot: MapSlot) -> Option<&str> {
        self.0.get(panel).and_then(|selection| selection.url(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PanelSelection)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, PanelSelection)> for SelectionMap {
    fn from_iter<I: IntoIterator<Item = (String, PanelSelection)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
