//! Axis-aligned bounds and the model group transform.

use cgmath::{EuclideanSpace, Matrix4, Point3, Transform, Vector3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    /// `None` for an empty point set.
    pub fn from_points(points: impl IntoIterator<Item = Point3<f32>>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut aabb = Aabb {
            min: first,
            max: first,
        };
        for p in points {
            aabb.min.x = aabb.min.x.min(p.x);
            aabb.min.y = aabb.min.y.min(p.y);
            aabb.min.z = aabb.min.z.min(p.z);
            aabb.max.x = aabb.max.x.max(p.x);
            aabb.max.y = aabb.max.y.max(p.y);
            aabb.max.z = aabb.max.z.max(p.z);
        }
        Some(aabb)
    }

    pub fn center(&self) -> Point3<f32> {
        self.min.midpoint(self.max)
    }

    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn max_extent(&self) -> f32 {
        let size = self.size();
        size.x.max(size.y).max(size.z)
    }
}

/// Uniform scale followed by a translation, applied to the whole model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupTransform {
    pub scale: f32,
    pub translation: Vector3<f32>,
}

impl Default for GroupTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            translation: Vector3::new(0.0, 0.0, 0.0),
        }
    }
}

impl GroupTransform {
    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.translation) * Matrix4::from_scale(self.scale)
    }

    pub fn transform_point(&self, p: Point3<f32>) -> Point3<f32> {
        self.to_matrix().transform_point(p)
    }
}
