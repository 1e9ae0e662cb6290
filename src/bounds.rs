//! Axis-aligned bounding boxes and the ray/box slab test.
//!
//! Boxes are closed: touching boxes intersect, and a point on a face is
//! contained. Degenerate boxes (zero extent along one or more axes, as for
//! planar cells) are legal. An *empty* box has `min > max` on some axis; it is
//! the identity for [`Aabb::union`] and intersects nothing.

use nalgebra::{Point3, Vector3};

use crate::ray::Ray;


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// The empty box: the identity element of [`Aabb::union`].
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Smallest box holding all of the points. Empty for an empty iterator.
    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point3<f64>>,
    {
        let mut b = Self::empty();
        for p in points {
            b.extend(p);
        }
        b
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.max[i] < self.min[i])
    }

    /// Grows the box to contain `p`.
    pub fn extend(&mut self, p: &Point3<f64>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    pub fn centre(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Axis (0, 1 or 2) along which the box is longest; the lowest axis wins ties.
    pub fn longest_axis(&self) -> usize {
        let e = self.extent();
        let mut axis = 0;
        for i in 1..3 {
            if e[i] > e[axis] {
                axis = i;
            }
        }
        axis
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    pub fn contains_point(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| self.min[i] <= p[i] && p[i] <= self.max[i])
    }

    /// The box grown by `tol` on every side. Empty boxes stay empty.
    pub fn inflated(&self, tol: f64) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let d = Vector3::repeat(tol);
        Aabb {
            min: self.min - d,
            max: self.max + d,
        }
    }

    /// Slab test. Returns the parametric interval `[t_enter, t_exit]` of the
    /// ray inside the box, clipped to `[t_min, t_max]`, or `None` if the
    /// clipped interval is empty.
    pub fn ray_range(&self, ray: &Ray, t_min: f64, t_max: f64) -> Option<(f64, f64)> {
        if self.is_empty() {
            return None;
        }
        let mut t0 = t_min;
        let mut t1 = t_max;
        for i in 0..3 {
            let o = ray.origin[i];
            let d = ray.direction[i];
            if d == 0.0 {
                // parallel to the slab: either always inside or never
                if o < self.min[i] || o > self.max[i] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut near = (self.min[i] - o) * inv;
            let mut far = (self.max[i] - o) * inv;
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            t0 = t0.max(near);
            t1 = t1.min(far);
            if t0 > t1 {
                return None;
            }
        }
        Some((t0, t1))
    }
}
