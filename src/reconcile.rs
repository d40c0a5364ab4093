//! Turns a change of the selection map into per-panel material edits.
//!
//! Each panel field (colour, normal, roughness) moves through its own small state
//! machine:
//!
//! - nothing selected before or after: untouched
//! - same URL as the one applied (or awaited): untouched
//! - a new URL: the texture is requested from the cache and assigned once ready,
//!   keeping the UV placement that was active on that field
//! - selection cleared: the field goes back to the panel's original material
//!
//! A panel whose entry is empty or missing gets its original material back as a
//! whole, which discards its private copy. Completions for URLs the panel no longer
//! targets are ignored.

use std::{collections::HashMap, rc::Rc};

use crate::{
    cache::{Settled, TextureCache, TextureLoader, TextureResource},
    data_structures::{
        material::{MapSlot, Material, OriginalMaterials, TextureBinding},
        scene::{MeshPanel, SceneAsset},
        selection::SelectionMap,
    },
};

/// What one call to [`Reconciler::apply`] or [`Reconciler::settle`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The map equals the last applied one; nothing was looked at.
    pub skipped: bool,
    /// Calls into the texture cache.
    pub requests: usize,
    /// Texture bindings written onto a panel material.
    pub assignments: usize,
    /// Fields or whole panels returned to their original state.
    pub reverts: usize,
    /// Fields waiting for a texture that is still loading.
    pub deferred: usize,
}

impl ReconcileReport {
    /// `true` if nothing was changed on any material.
    pub fn is_noop(&self) -> bool {
        self.requests == 0 && self.assignments == 0 && self.reverts == 0
    }
}

#[derive(Default)]
pub struct Reconciler {
    applied: Option<SelectionMap>,
    // (panel, field) -> URL the field is waiting for
    pending: HashMap<(String, MapSlot), String>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The selection map the scene currently reflects (modulo pending loads).
    pub fn applied(&self) -> Option<&SelectionMap> {
        self.applied.as_ref()
    }

    /// Number of fields waiting for their texture.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Forget everything, e.g. when the scene is replaced.
    pub fn reset(&mut self) {
        self.applied = None;
        self.pending.clear();
    }

    pub fn apply<L>(
        &mut self,
        next: &SelectionMap,
        scene: &mut SceneAsset<L::Texture>,
        originals: &OriginalMaterials<L::Texture>,
        cache: &mut TextureCache<L>,
    ) -> ReconcileReport
    where
        L: TextureLoader,
        L::Texture: 'static,
    {
        let mut report = ReconcileReport::default();
        if self.applied.as_ref() == Some(next) {
            report.skipped = true;
            return report;
        }

        for panel in scene.panels_mut() {
            let Some(original) = originals.get(panel.origin()) else {
                log::warn!("Panel {} has no original material, skipping", panel.name());
                continue;
            };
            match next.get(panel.name()).filter(|selection| !selection.is_empty()) {
                None => self.restore_panel(panel, original, &mut report),
                Some(selection) => {
                    for slot in MapSlot::ALL {
                        match selection.url(slot) {
                            Some(url) => {
                                self.target_field(panel, slot, url, original, cache, &mut report)
                            }
                            None => self.revert_field(panel, slot, original, &mut report),
                        }
                    }
                }
            }
        }

        self.applied = Some(next.clone());
        log::debug!("Reconciled selection: {report:?}");
        report
    }

    /// Apply texture completions reported by [`TextureCache::pump`].
    ///
    /// A completion is only assigned to fields still waiting for exactly that URL.
    /// A failed load leaves the field on whatever it showed before.
    pub fn settle<L>(
        &mut self,
        settled: &[Settled],
        scene: &mut SceneAsset<L::Texture>,
        originals: &OriginalMaterials<L::Texture>,
        cache: &TextureCache<L>,
    ) -> ReconcileReport
    where
        L: TextureLoader,
        L::Texture: 'static,
    {
        let mut report = ReconcileReport::default();
        for done in settled {
            let waiting: Vec<(String, MapSlot)> = self
                .pending
                .iter()
                .filter(|(_, url)| **url == done.url)
                .map(|(key, _)| key.clone())
                .collect();
            for key in waiting {
                self.pending.remove(&key);
                let (name, slot) = key;
                if !done.is_ready() {
                    log::debug!("Keeping previous {slot:?} map on {name}, {} failed", done.url);
                    continue;
                }
                let current = self.applied.as_ref().and_then(|map| map.target(&name, slot));
                if current != Some(done.url.as_str()) {
                    continue;
                }
                let (Some(panel), Some(resource)) = (scene.panel_mut(&name), cache.get(&done.url))
                else {
                    continue;
                };
                let original = originals.get(panel.origin());
                assign(panel, slot, resource, original.map(|rc| rc.as_ref()));
                report.assignments += 1;
            }
        }
        report
    }

    fn target_field<L>(
        &mut self,
        panel: &mut MeshPanel<L::Texture>,
        slot: MapSlot,
        url: &str,
        original: &Rc<Material<L::Texture>>,
        cache: &mut TextureCache<L>,
        report: &mut ReconcileReport,
    ) where
        L: TextureLoader,
        L::Texture: 'static,
    {
        let key = (panel.name().to_string(), slot);
        if self.pending.get(&key).is_some_and(|awaited| awaited == url) {
            return;
        }
        if panel.material().applied_url(slot) == Some(url) {
            // back on the applied URL while another one was still loading
            self.pending.remove(&key);
            return;
        }

        let resource = cache.request(url);
        report.requests += 1;
        if resource.is_ready() {
            self.pending.remove(&key);
            assign(panel, slot, resource, Some(original.as_ref()));
            report.assignments += 1;
        } else {
            self.pending.insert(key, url.to_string());
            report.deferred += 1;
        }
    }

    fn revert_field<T>(
        &mut self,
        panel: &mut MeshPanel<T>,
        slot: MapSlot,
        original: &Rc<Material<T>>,
        report: &mut ReconcileReport,
    ) {
        self.pending.remove(&(panel.name().to_string(), slot));
        if same_binding(panel.material().map(slot), original.map(slot)) {
            return;
        }
        let binding = original.map(slot).cloned();
        panel.material_mut().set_map(slot, binding);
        report.reverts += 1;
    }

    fn restore_panel<T>(
        &mut self,
        panel: &mut MeshPanel<T>,
        original: &Rc<Material<T>>,
        report: &mut ReconcileReport,
    ) {
        for slot in MapSlot::ALL {
            self.pending.remove(&(panel.name().to_string(), slot));
        }
        if panel.restore(original) {
            report.reverts += 1;
        }
    }
}

/// Bind `resource` to `slot`, carrying over the UV placement of whatever the
/// field shows right now, or of the original map if the field is empty.
fn assign<T>(
    panel: &mut MeshPanel<T>,
    slot: MapSlot,
    resource: Rc<TextureResource<T>>,
    original: Option<&Material<T>>,
) {
    let transform = panel
        .material()
        .map(slot)
        .or_else(|| original.and_then(|material| material.map(slot)))
        .map(|binding| binding.transform)
        .unwrap_or_default();
    panel
        .material_mut()
        .set_map(slot, Some(TextureBinding::with_transform(resource, transform)));
}

fn same_binding<T>(a: Option<&TextureBinding<T>>, b: Option<&TextureBinding<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::ptr_eq(&a.resource, &b.resource) && a.transform == b.transform,
        _ => false,
    }
}
