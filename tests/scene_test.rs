use std::{collections::BTreeMap, rc::Rc};

use cgmath::{Point3, Vector3};
use panel_ngin::{
    baseline::apply_baseline,
    config::{AuxMaps, ShadingDefaults},
    data_structures::{
        bounds::GroupTransform,
        material::{Material, MapSlot, UvTransform},
        scene::{MeshPanel, PanelGeometry, SceneAsset},
    },
    introspect::Introspector,
    normalize::{Normalizer, bounds},
};

use crate::common::test_utils::{FakeTexture, Harness, panel, tiled};
mod common;

const EPS: f32 = 1e-5;

fn scene(names: &[&str]) -> SceneAsset<FakeTexture> {
    SceneAsset::new(
        "memory://scene.glb",
        names.iter().map(|name| panel(name, None)).collect(),
    )
}

fn boxed(min: [f32; 3], max: [f32; 3]) -> SceneAsset<FakeTexture> {
    let geometry = PanelGeometry::from_positions(vec![min, max]);
    SceneAsset::new(
        "memory://box.glb",
        vec![MeshPanel::new("Box", Rc::new(geometry), Material::new("box"))],
    )
}

#[test]
fn panel_list_follows_scene_order() {
    let scene = scene(&["Upper", "Toe", "Quarter"]);
    let mut introspector = Introspector::new();

    let panels = introspector.traverse(&scene);
    let names: Vec<&str> = panels.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["Upper", "Toe", "Quarter"]);
    assert_eq!(panels[1].material, "Toe_material");
}

#[test]
fn panel_list_is_stable_for_the_same_scene() {
    let scene = scene(&["Upper", "Toe"]);
    let mut introspector = Introspector::new();

    let first = introspector.traverse(&scene);
    let second = introspector.traverse(&scene);
    assert!(Rc::ptr_eq(&first, &second));
}

#[test]
fn panel_list_is_kept_when_a_new_scene_has_the_same_names() {
    let mut introspector = Introspector::new();
    let first = introspector.traverse(&scene(&["Upper", "Toe"]));
    let reloaded = introspector.traverse(&scene(&["Toe", "Upper"]));

    assert!(Rc::ptr_eq(&first, &reloaded));
}

#[test]
fn panel_list_changes_with_the_name_set() {
    let mut introspector = Introspector::new();
    let first = introspector.traverse(&scene(&["Upper", "Toe"]));
    let other = introspector.traverse(&scene(&["Upper", "Heel"]));

    assert!(!Rc::ptr_eq(&first, &other));
    assert!(Rc::ptr_eq(&other, &introspector.panels()));
    assert_eq!(other[1].name, "Heel");
}

#[test]
fn empty_scene_has_no_panels() {
    let mut introspector = Introspector::new();
    assert!(introspector.traverse(&scene(&[])).is_empty());
}

#[test]
fn duplicate_panel_names_are_made_unique() {
    let scene = scene(&["Lace", "Lace", "Lace_1"]);
    let names: Vec<&str> = scene.panels().iter().map(MeshPanel::name).collect();

    assert_eq!(names, ["Lace", "Lace_1", "Lace_1_1"]);
    assert!(scene.panel("Lace_1").is_some());
}

#[test]
fn normalizer_scales_centers_and_grounds() {
    let mut scene = boxed([-1.0, 2.0, -1.0], [3.0, 4.0, 1.0]);
    let group = Normalizer::new(2.0).normalize(&mut scene).expect("has vertices");

    assert!((group.scale - 0.5).abs() < EPS);
    let offset = group.translation - Vector3::new(-0.5, -1.0, 0.0);
    assert!(offset.x.abs() < EPS && offset.y.abs() < EPS && offset.z.abs() < EPS);
    assert_eq!(scene.group(), group);

    let normalized = bounds(&scene, group).expect("has vertices");
    assert!(normalized.min.y.abs() < EPS);
    assert!((normalized.max_extent() - 2.0).abs() < EPS);
    // centered horizontally
    assert!((normalized.center().x).abs() < EPS);
    assert!((normalized.center().z).abs() < EPS);
}

#[test]
fn normalizer_marks_panels_dirty() {
    let mut scene = boxed([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
    scene.panels_mut()[0].take_dirty();

    Normalizer::new(2.5).normalize(&mut scene);
    assert!(scene.panels()[0].is_dirty());
}

#[test]
fn normalizer_leaves_empty_scene_alone() {
    let mut scene = scene(&[]);
    assert_eq!(Normalizer::new(2.5).normalize(&mut scene), None);
    assert_eq!(scene.group(), GroupTransform::default());
}

#[test]
fn degenerate_scene_is_not_scaled() {
    let mut scene = boxed([1.0, 1.0, 1.0], [1.0, 1.0, 1.0]);
    let group = Normalizer::new(2.5).normalize(&mut scene).expect("has vertices");

    assert_eq!(group.scale, 1.0);
    let p = group.transform_point(Point3::new(1.0, 1.0, 1.0));
    assert!(p.x.abs() < EPS && p.y.abs() < EPS && p.z.abs() < EPS);
}

fn shading() -> ShadingDefaults {
    ShadingDefaults {
        roughness: 0.45,
        metalness: 0.1,
        env_map_intensity: 1.2,
    }
}

#[test]
fn baseline_sets_shading_on_every_panel() {
    let mut h = Harness::shoe();
    let attached = apply_baseline(&mut h.scene, &shading(), &BTreeMap::new(), &mut h.cache);

    assert_eq!(attached, 0);
    for panel in h.scene.panels() {
        let m = panel.material();
        assert_eq!((m.roughness, m.metalness, m.env_map_intensity), (0.45, 0.1, 1.2));
    }
    assert!(h.cache.is_empty());
}

#[test]
fn baseline_aux_map_reuses_colour_placement() {
    let mut h = Harness::shoe();
    let mut aux = BTreeMap::new();
    aux.insert(
        "Upper".to_string(),
        AuxMaps {
            normal_url: Some("static/upper_normal.png".to_string()),
            roughness_url: None,
        },
    );
    aux.insert(
        "Heel".to_string(),
        AuxMaps {
            normal_url: Some("static/heel_normal.png".to_string()),
            roughness_url: None,
        },
    );

    let attached = apply_baseline(&mut h.scene, &shading(), &aux, &mut h.cache);

    assert_eq!(attached, 1);
    assert_eq!(h.counter.pending(), 1);
    assert_eq!(h.loader.decodes_of("static/heel_normal.png"), 0);
    let normal = h.material("Upper").map(MapSlot::Normal).expect("bound");
    assert_eq!(normal.url(), "static/upper_normal.png");
    assert_eq!(normal.transform, tiled());
    assert!(!normal.resource.is_ready());
    assert_eq!(h.map_url("Toe", MapSlot::Normal), None);

    h.loader.complete("static/upper_normal.png");
    h.cache.pump();
    assert!(
        h.material("Upper")
            .map(MapSlot::Normal)
            .is_some_and(|b| b.resource.is_ready())
    );
    assert_eq!(h.counter.pending(), 0);
}

#[test]
fn aux_map_without_colour_map_uses_identity_placement() {
    let mut h = Harness::shoe();
    let mut aux = BTreeMap::new();
    aux.insert(
        "Toe".to_string(),
        AuxMaps {
            normal_url: None,
            roughness_url: Some("static/toe_rough.png".to_string()),
        },
    );

    apply_baseline(&mut h.scene, &shading(), &aux, &mut h.cache);
    let rough = h.material("Toe").map(MapSlot::Roughness).expect("bound");
    assert_eq!(rough.transform, UvTransform::default());
}

#[test]
fn dirty_marking_follows_texture_references() {
    let mut h = Harness::shoe();
    for panel in h.scene.panels_mut() {
        panel.take_dirty();
    }

    assert_eq!(h.scene.mark_dirty_referencing("baked/upper.png"), 1);
    assert!(h.scene.panel("Upper").is_some_and(MeshPanel::is_dirty));
    assert!(!h.scene.panel("Toe").is_some_and(MeshPanel::is_dirty));
}
