//! Shading defaults and static auxiliary maps applied once per scene load.

use std::collections::BTreeMap;

use crate::{
    cache::{TextureCache, TextureLoader},
    config::{AuxMaps, ShadingDefaults},
    data_structures::{
        material::{MapSlot, TextureBinding},
        scene::SceneAsset,
    },
};

/// Set the shading factors of every panel and attach the configured auxiliary
/// maps. Independent of the user's selection.
///
/// Must run before the original materials are captured, so that reverting a
/// selection lands on the baseline look. Auxiliary maps that are still loading are
/// bound anyway; the renderer uses neutral fallbacks until they are ready. Returns
/// the number of auxiliary maps attached.
pub fn apply_baseline<L>(
    scene: &mut SceneAsset<L::Texture>,
    shading: &ShadingDefaults,
    aux_maps: &BTreeMap<String, AuxMaps>,
    cache: &mut TextureCache<L>,
) -> usize
where
    L: TextureLoader,
    L::Texture: 'static,
{
    let mut attached = 0;
    for panel in scene.panels_mut() {
        let aux = aux_maps.get(panel.name());
        let material = panel.material_mut();
        material.roughness = shading.roughness;
        material.metalness = shading.metalness;
        material.env_map_intensity = shading.env_map_intensity;

        let Some(aux) = aux else { continue };
        for (slot, url) in [
            (MapSlot::Normal, aux.normal_url.as_deref()),
            (MapSlot::Roughness, aux.roughness_url.as_deref()),
        ] {
            let Some(url) = url else { continue };
            let transform = material
                .map(slot)
                .or_else(|| material.map(MapSlot::Color))
                .map(|binding| binding.transform)
                .unwrap_or_default();
            let resource = cache.request(url);
            material.set_map(slot, Some(TextureBinding::with_transform(resource, transform)));
            attached += 1;
        }
    }

    let unknown: Vec<&String> = aux_maps
        .keys()
        .filter(|name| scene.panel(name).is_none())
        .collect();
    if !unknown.is_empty() {
        log::warn!("Auxiliary maps configured for unknown panels: {unknown:?}");
    }
    attached
}
