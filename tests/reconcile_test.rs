use std::rc::Rc;

use panel_ngin::data_structures::{
    material::{MapSlot, TextureBinding, UvTransform},
    selection::{PanelSelection, SelectionMap},
};

use crate::common::test_utils::{Harness, tiled};
mod common;

const URL_A: &str = "catalog/leather_red.png";
const URL_B: &str = "catalog/suede_blue.png";

fn upper(url: &str) -> SelectionMap {
    SelectionMap::new().with("Upper", PanelSelection::color(url))
}

/// Scenario A: the selected panel changes, the others stay on their baseline.
fn scenario_a() -> Harness {
    let mut h = Harness::shoe();
    let report = h.select(&upper(URL_A));
    assert_eq!(report.requests, 1);
    assert_eq!(report.deferred, 1);
    // nothing is assigned while the texture is loading
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some("baked/upper.png"));

    h.loader.complete(URL_A);
    h.pump();
    h
}

#[test]
fn scenario_a_selects_one_panel() {
    let h = scenario_a();

    assert_eq!(h.map_url("Upper", MapSlot::Color), Some(URL_A));
    let binding = h.material("Upper").map(MapSlot::Color).expect("bound");
    assert!(binding.resource.is_ready());
    assert_eq!(binding.transform, tiled());
    for untouched in ["Toe", "Quarter"] {
        let panel = h.scene.panel(untouched).expect("panel exists");
        assert!(Rc::ptr_eq(panel.material_rc(), h.original(untouched)));
        assert!(!panel.is_customized());
    }
    assert_eq!(h.counter.pending(), 0);
}

#[test]
fn scenario_b_swaps_texture_and_keeps_placement() {
    let mut h = scenario_a();

    // the placement active on A right before the swap
    let placed = UvTransform {
        offset: [0.1, 0.2],
        repeat: [3.0, 3.0],
        center: [0.5, 0.5],
        rotation: 1.2,
    };
    {
        let panel = h.scene.panel_mut("Upper").expect("panel exists");
        let resource = panel
            .material()
            .map(MapSlot::Color)
            .expect("bound")
            .resource
            .clone();
        panel
            .material_mut()
            .set_map(MapSlot::Color, Some(TextureBinding::with_transform(resource, placed)));
    }
    let entries_before = h.cache.len();

    h.select(&upper(URL_B));
    assert_eq!(h.cache.len(), entries_before + 1);
    h.loader.complete(URL_B);
    h.pump();

    let binding = h.material("Upper").map(MapSlot::Color).expect("bound");
    assert_eq!(binding.url(), URL_B);
    assert_eq!(binding.transform, placed);
    assert!(h.cache.get(URL_A).is_some_and(|a| a.is_ready()));
    assert_eq!(h.loader.decodes_of(URL_A), 1);
    assert_eq!(h.counter.pending(), 0);
}

#[test]
fn scenario_c_empty_map_restores_original() {
    let mut h = scenario_a();
    h.select(&upper(URL_B));
    h.loader.complete(URL_B);
    h.pump();

    let report = h.select(&SelectionMap::new());
    assert_eq!(report.reverts, 1);
    assert_eq!(report.requests, 0);

    let panel = h.scene.panel("Upper").expect("panel exists");
    assert!(Rc::ptr_eq(panel.material_rc(), h.original("Upper")));
    assert!(!panel.is_customized());
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some("baked/upper.png"));
    assert!(h.cache.get(URL_A).is_some_and(|r| r.is_ready()));
    assert!(h.cache.get(URL_B).is_some_and(|r| r.is_ready()));
}

#[test]
fn scenario_d_two_panels_share_one_load() {
    let mut h = Harness::shoe();
    let shared = "catalog/mesh_white.png";
    let selection = SelectionMap::new()
        .with("Toe", PanelSelection::color(shared))
        .with("Quarter", PanelSelection::color(shared));

    let report = h.select(&selection);
    assert_eq!(report.deferred, 2);
    assert_eq!(h.loader.decodes_of(shared), 1);
    assert_eq!(h.counter.pending(), 1);

    h.loader.complete(shared);
    let settled = h.pump();
    assert_eq!(settled.len(), 1);

    assert_eq!(h.cache.len(), 1);
    let toe = h.material("Toe").map(MapSlot::Color).expect("bound");
    let quarter = h.material("Quarter").map(MapSlot::Color).expect("bound");
    assert!(Rc::ptr_eq(&toe.resource, &quarter.resource));
    assert_eq!(h.counter.pending(), 0);
}

#[test]
fn same_map_twice_does_no_work() {
    let mut h = scenario_a();
    for panel in h.scene.panels_mut() {
        panel.take_dirty();
    }
    let decodes = h.loader.decodes();

    let again = h.select(&upper(URL_A));
    assert!(again.skipped);
    assert!(again.is_noop());
    assert_eq!(h.loader.decodes(), decodes);
    assert!(h.scene.panels().iter().all(|p| !p.is_dirty()));
}

#[test]
fn equal_but_rebuilt_map_does_no_work() {
    let mut h = scenario_a();
    for panel in h.scene.panels_mut() {
        panel.take_dirty();
    }

    let rebuilt: SelectionMap = [("Upper".to_string(), PanelSelection::color(URL_A))]
        .into_iter()
        .collect();
    let report = h.select(&rebuilt);
    assert!(report.is_noop());
    assert!(h.scene.panels().iter().all(|p| !p.is_dirty()));
}

#[test]
fn unchanged_entry_is_left_alone_when_another_panel_changes() {
    let mut h = scenario_a();
    let upper_before = h.scene.panel("Upper").expect("panel exists").material().id();

    let report = h.select(&upper(URL_A).with("Toe", PanelSelection::color(URL_B)));
    assert_eq!(report.requests, 1);
    assert_eq!(
        h.scene.panel("Upper").expect("panel exists").material().id(),
        upper_before
    );
}

#[test]
fn stale_completion_is_ignored() {
    let mut h = Harness::shoe();
    h.select(&upper(URL_A));
    h.select(&upper(URL_B));
    assert_eq!(h.reconciler.pending(), 1);

    h.loader.complete(URL_A);
    h.pump();
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some("baked/upper.png"));
    // the load itself still settled and is cached for later
    assert!(h.cache.get(URL_A).is_some_and(|r| r.is_ready()));
    assert_eq!(h.counter.pending(), 1);

    h.loader.complete(URL_B);
    h.pump();
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some(URL_B));
    assert_eq!(h.counter.pending(), 0);
    assert_eq!(h.reconciler.pending(), 0);
}

#[test]
fn switching_back_to_the_earlier_url_waits_for_it() {
    let mut h = Harness::shoe();
    h.select(&upper(URL_A));
    h.select(&upper(URL_B));
    h.select(&upper(URL_A));

    h.loader.complete(URL_B);
    h.pump();
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some("baked/upper.png"));

    h.loader.complete(URL_A);
    h.pump();
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some(URL_A));
    assert_eq!(h.loader.decodes_of(URL_A), 1);
}

#[test]
fn clearing_before_the_load_finishes_keeps_the_original() {
    let mut h = Harness::shoe();
    h.select(&upper(URL_A));
    h.select(&SelectionMap::new());

    h.loader.complete(URL_A);
    h.pump();

    let panel = h.scene.panel("Upper").expect("panel exists");
    assert!(Rc::ptr_eq(panel.material_rc(), h.original("Upper")));
    assert_eq!(h.counter.pending(), 0);
}

#[test]
fn failed_texture_keeps_the_previous_map() {
    let mut h = scenario_a();
    let broken = "catalog/missing.png";
    h.select(&upper(broken));
    h.loader.fail(broken);
    let settled = h.pump();

    assert!(!settled[0].is_ready());
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some(URL_A));
    assert_eq!(h.counter.pending(), 0);
    assert!(!h.cache.contains(broken));

    // a later selection of the same URL tries again
    h.select(&SelectionMap::new());
    h.select(&upper(broken));
    assert_eq!(h.loader.decodes_of(broken), 2);
}

#[test]
fn clearing_one_field_reverts_only_that_field() {
    let mut h = Harness::shoe();
    let normal = "catalog/grain_normal.png";
    let both = SelectionMap::new().with(
        "Upper",
        PanelSelection {
            color_url: Some(URL_A.to_string()),
            normal_url: Some(normal.to_string()),
            roughness_url: None,
        },
    );
    h.select(&both);
    h.loader.complete(URL_A);
    h.loader.complete(normal);
    h.pump();
    assert_eq!(h.map_url("Upper", MapSlot::Normal), Some(normal));
    // a field without a previous map starts from the identity placement
    assert_eq!(
        h.material("Upper").map(MapSlot::Normal).expect("bound").transform,
        UvTransform::default()
    );

    let report = h.select(&upper(URL_A));
    assert_eq!(report.reverts, 1);
    assert_eq!(h.map_url("Upper", MapSlot::Normal), None);
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some(URL_A));
}

#[test]
fn aux_fields_are_independent_of_colour() {
    let mut h = Harness::shoe();
    let roughness = "catalog/rough.png";
    let selection = SelectionMap::new().with(
        "Toe",
        PanelSelection {
            roughness_url: Some(roughness.to_string()),
            ..Default::default()
        },
    );
    h.select(&selection);
    h.loader.complete(roughness);
    h.pump();

    assert_eq!(h.map_url("Toe", MapSlot::Roughness), Some(roughness));
    assert_eq!(h.map_url("Toe", MapSlot::Color), None);
    assert_eq!(h.map_url("Toe", MapSlot::Normal), None);
}

#[test]
fn revert_is_observationally_identical() {
    let mut h = Harness::shoe();
    let before = format!("{:?}", h.material("Quarter").map(MapSlot::Color));
    let factors = {
        let m = h.material("Quarter");
        (m.base_color, m.roughness, m.metalness, m.env_map_intensity)
    };

    h.select(&SelectionMap::new().with("Quarter", PanelSelection::color(URL_B)));
    h.loader.complete(URL_B);
    h.pump();
    assert_ne!(format!("{:?}", h.material("Quarter").map(MapSlot::Color)), before);

    h.select(&SelectionMap::new());
    let m = h.material("Quarter");
    assert_eq!(format!("{:?}", m.map(MapSlot::Color)), before);
    assert_eq!(
        (m.base_color, m.roughness, m.metalness, m.env_map_intensity),
        factors
    );
}

#[test]
fn originals_are_never_written() {
    let mut h = scenario_a();
    h.select(&upper(URL_B));
    h.loader.complete(URL_B);
    h.pump();

    let original = h.original("Upper");
    assert_eq!(original.applied_url(MapSlot::Color), Some("baked/upper.png"));
    assert_eq!(original.map(MapSlot::Color).expect("bound").transform, tiled());
    assert!(h.scene.panel("Upper").expect("panel exists").is_customized());
}

#[test]
fn unknown_panels_are_ignored() {
    let mut h = Harness::shoe();
    let report = h.select(&SelectionMap::new().with("Heel", PanelSelection::color(URL_A)));

    assert_eq!(report.requests, 0);
    assert!(h.cache.is_empty());
    assert!(h.scene.panels().iter().all(|p| !p.is_customized()));
}

#[test]
fn empty_entry_counts_as_cleared() {
    let mut h = scenario_a();
    h.select(&SelectionMap::new().with("Upper", PanelSelection::default()));

    let panel = h.scene.panel("Upper").expect("panel exists");
    assert!(Rc::ptr_eq(panel.material_rc(), h.original("Upper")));
}

#[test]
fn ready_texture_is_assigned_immediately() {
    let mut h = scenario_a();
    h.select(&SelectionMap::new());

    let report = h.select(&upper(URL_A));
    assert_eq!(report.assignments, 1);
    assert_eq!(report.deferred, 0);
    assert_eq!(h.map_url("Upper", MapSlot::Color), Some(URL_A));
    assert!(h.scene.panel("Upper").expect("panel exists").is_dirty());
}
