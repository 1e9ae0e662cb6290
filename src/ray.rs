//! Rays, segments and ray hits.

use nalgebra::{Point3, Vector3};


/// A parameterized line `origin + t * direction`.
///
/// The direction is not normalized: for a ray built from a segment, `t = 0`
/// is the first endpoint and `t = 1` the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: Vector3<f64>,
}

impl Ray {
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Self {
        Self { origin, direction }
    }

    /// Ray running from `p1` (t = 0) to `p2` (t = 1).
    pub fn from_segment(p1: Point3<f64>, p2: Point3<f64>) -> Self {
        Self {
            origin: p1,
            direction: p2 - p1,
        }
    }

    /// Point at parameter `t`.
    pub fn at(&self, t: f64) -> Point3<f64> {
        self.origin + self.direction * t
    }

    /// A ray with a zero direction cannot intersect anything.
    pub fn is_degenerate(&self) -> bool {
        self.direction.norm_squared() == 0.0
    }
}

/// The closest intersection of a ray with the mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Ray parameter of the intersection.
    pub t: f64,
    /// Intersection point.
    pub point: Point3<f64>,
    /// Index of the intersected cell in the store.
    pub cell: usize,
    /// Index of the intersected sub-primitive (triangle or face) of the cell.
    pub sub_id: usize,
}

impl RayHit {
    /// Ordering used to pick a single winner: smaller `t`, then lower cell
    /// index, then lower sub id. Independent of traversal order.
    pub(crate) fn precedes(&self, other: &RayHit) -> bool {
        (self.t, self.cell, self.sub_id) < (other.t, other.cell, other.sub_id)
    }
}
