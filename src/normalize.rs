use cgmath::{EuclideanSpace, Vector3};

use crate::data_structures::{
    bounds::{Aabb, GroupTransform},
    scene::SceneAsset,
};

/// Centers, scales and grounds a model so that every scene is framed the same.
#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
    /// Size of the largest bounding box dimension after scaling.
    pub footprint: f32,
}

impl Normalizer {
    pub fn new(footprint: f32) -> Self {
        Self { footprint }
    }

    /// Compute and install the group transform of `scene`.
    ///
    /// Runs in two passes. The first scales the raw bounds to the footprint and
    /// moves their center to the origin; the second measures the result again and
    /// lifts it so that its lowest point sits on `y = 0`. Returns `None` for a scene
    /// without vertices, which is left untouched.
    pub fn normalize<T>(&self, scene: &mut SceneAsset<T>) -> Option<GroupTransform> {
        let raw = bounds(scene, GroupTransform::default())?;
        let extent = raw.max_extent();
        let scale = if extent > f32::EPSILON {
            self.footprint / extent
        } else {
            1.0
        };
        let centered = GroupTransform {
            scale,
            translation: -raw.center().to_vec() * scale,
        };

        let measured = bounds(scene, centered)?;
        let grounded = GroupTransform {
            translation: centered.translation - Vector3::unit_y() * measured.min.y,
            ..centered
        };

        log::debug!(
            "Normalized {}: scale {:.4}, translation {:?}",
            scene.url(),
            grounded.scale,
            grounded.translation
        );
        scene.set_group(grounded);
        Some(grounded)
    }
}

/// World-space bounds of every panel with `group` applied on top.
pub fn bounds<T>(scene: &SceneAsset<T>, group: GroupTransform) -> Option<Aabb> {
    let matrix = group.to_matrix();
    Aabb::from_points(scene.panels().iter().flat_map(|panel| {
        panel
            .geometry()
            .world_positions()
            .map(move |p| cgmath::Transform::transform_point(&matrix, p))
    }))
}
