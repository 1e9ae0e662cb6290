//! Exact geometric predicates on triangles, planar polygons and tetrahedra.
//!
//! These are the building blocks of the per-cell evaluators in [`crate::cell`].
//! Tolerances are absolute distances in the units of the mesh.

use nalgebra::{Matrix3, Point3, Vector3};

use crate::ray::Ray;

/// Slack on parametric coordinates so that points on shared faces are not
/// lost to rounding.
pub const PCOORD_EPSILON: f64 = 1e-10;

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> [Point3<f64>; 3] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn plane_from_triangle() {
        let [a, b, c] = tri();
        let plane = Plane::from_triangle(&a, &b, &c).unwrap();
        assert_eq!(plane.normal, Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(plane.offset, 0.0);
        assert_eq!(plane.signed_distance(&Point3::new(3.0, 3.0, 2.0)), 2.0);
    }

    #[test]
    fn collinear_points_have_no_plane() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 1.0, 1.0);
        let c = Point3::new(2.0, 2.0, 2.0);
        assert!(Plane::from_triangle(&a, &b, &c).is_none());
    }

    #[test]
    fn ray_hits_triangle_interior() {
        let [a, b, c] = tri();
        let ray = Ray::from_segment(Point3::new(0.25, 0.25, 1.0), Point3::new(0.25, 0.25, -1.0));
        let (t, x) = intersect_triangle(&ray, &a, &b, &c, 0.0, 1.0, 0.0).unwrap();
        assert!((t - 0.5).abs() < 1e-12, "t: {}", t);
        assert!((x - Point3::new(0.25, 0.25, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn near_miss_within_tolerance() {
        let [a, b, c] = tri();
        // passes 0.005 outside the hypotenuse
        let off = 0.5 + 0.005 / 2f64.sqrt();
        let ray = Ray::from_segment(Point3::new(off, off, 1.0), Point3::new(off, off, -1.0));
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, 1.0, 0.001).is_none());
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, 1.0, 0.01).is_some());
    }

    #[test]
    fn parametric_range_is_strict() {
        let [a, b, c] = tri();
        let ray = Ray::from_segment(Point3::new(0.25, 0.25, 1.0), Point3::new(0.25, 0.25, 0.5));
        // plane crossing lies at t = 2, outside the segment, whatever the tolerance
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, 1.0, 10.0).is_none());
    }

    #[test]
    fn parallel_ray_misses() {
        let [a, b, c] = tri();
        let ray = Ray::new(Point3::new(-1.0, 0.25, 0.0), Vector3::new(1.0, 0.0, 0.0));
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, 10.0, 0.1).is_none());
    }

    #[test]
    fn closest_point_regions() {
        let [a, b, c] = tri();
        let cp = |p: Point3<f64>| closest_point_on_triangle(&p, &a, &b, &c);
        assert_eq!(cp(Point3::new(-1.0, -1.0, 0.0)), a);
        assert_eq!(cp(Point3::new(2.0, -0.5, 0.0)), b);
        assert_eq!(cp(Point3::new(-0.5, 2.0, 0.0)), c);
        assert!((cp(Point3::new(0.5, -1.0, 3.0)) - Point3::new(0.5, 0.0, 0.0)).norm() < 1e-12);
        assert!((cp(Point3::new(0.2, 0.3, -4.0)) - Point3::new(0.2, 0.3, 0.0)).norm() < 1e-12);
        let on_hyp = cp(Point3::new(1.0, 1.0, 0.0));
        assert!((on_hyp - Point3::new(0.5, 0.5, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn concave_polygon_containment() {
        // an L shape; (1.5, 1.5) lies in the notch
        let l = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        let plane = Plane::from_polygon(&l).unwrap();
        assert!(point_in_polygon(&Point3::new(0.5, 1.5, 0.0), &l, &plane.normal));
        assert!(point_in_polygon(&Point3::new(1.5, 0.5, 0.0), &l, &plane.normal));
        assert!(!point_in_polygon(&Point3::new(1.5, 1.5, 0.0), &l, &plane.normal));

        let down = |x: f64, y: f64| Ray::from_segment(Point3::new(x, y, 1.0), Point3::new(x, y, -1.0));
        assert!(intersect_polygon(&down(0.5, 1.5), &l, 0.0, 1.0, 0.0).is_some());
        assert!(intersect_polygon(&down(1.5, 1.5), &l, 0.0, 1.0, 0.0).is_none());
        assert!(intersect_polygon(&down(1.5, 1.5), &l, 0.0, 1.0, 0.6).is_some());
    }

    #[test]
    fn tetra_parametric_coordinates() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        let d = Point3::new(0.0, 0.0, 1.0);
        let p = tetra_pcoords(&Point3::new(0.1, 0.2, 0.3), &a, &b, &c, &d).unwrap();
        assert!((p[0] - 0.1).abs() < 1e-12);
        assert!((p[1] - 0.2).abs() < 1e-12);
        assert!((p[2] - 0.3).abs() < 1e-12);
        assert!(pcoords_in_tetra(&p));
        let q = tetra_pcoords(&Point3::new(0.5, 0.5, 0.5), &a, &b, &c, &d).unwrap();
        assert!(!pcoords_in_tetra(&q));
        // flat tetra has no inverse
        let flat = Point3::new(1.0, 1.0, 0.0);
        assert!(tetra_pcoords(&Point3::new(0.1, 0.2, 0.3), &a, &b, &c, &flat).is_none());
    }
}

/// Represents a plane, defined by a unit normal and an offset value.
/// Each component of the normal corresponds to a, b, c, respectively.
/// The offset value corresponds to d.
/// The plane is then defined by `ax + by + cz + d = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub offset: f64,
}

impl Plane {
    /// Plane through three points, or `None` if they are collinear.
    pub fn from_triangle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Self> {
        let normal = (b - a).cross(&(c - a)).try_normalize(0.0)?;
        Some(Self {
            normal,
            offset: -normal.dot(&a.coords),
        })
    }

    /// Best-fit plane of a polygon: Newell normal through the vertex centroid.
    pub fn from_polygon(points: &[Point3<f64>]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let normal = newell_normal(points).try_normalize(0.0)?;
        let centroid = centroid(points);
        Some(Self {
            normal,
            offset: -normal.dot(&centroid.coords),
        })
    }

    pub fn signed_distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) + self.offset
    }

    /// Ray parameter at which the ray crosses the plane, if it crosses it
    /// within `[t_min, t_max]`. Rays parallel to the plane never cross.
    pub fn intersect(&self, ray: &Ray, t_min: f64, t_max: f64) -> Option<f64> {
        let denom = self.normal.dot(&ray.direction);
        let num = -self.signed_distance(&ray.origin);
        if denom.abs() <= f64::EPSILON * num.abs() || denom == 0.0 {
            return None;
        }
        let t = num / denom;
        (t >= t_min && t <= t_max).then_some(t)
    }
}

/// Newell's normal of a (possibly non-planar) polygon. Not normalized; its
/// length is twice the projected area.
pub fn newell_normal(points: &[Point3<f64>]) -> Vector3<f64> {
    let mut n = Vector3::zeros();
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        n.x += (p.y - q.y) * (p.z + q.z);
        n.y += (p.z - q.z) * (p.x + q.x);
        n.z += (p.x - q.x) * (p.y + q.y);
    }
    n
}

pub fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / points.len() as f64)
}

/// Closest point to `p` on segment `ab`.
pub fn closest_point_on_segment(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> Point3<f64> {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 == 0.0 {
        return *a;
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest point to `p` on triangle `abc` (Voronoi region walk).
pub fn closest_point_on_triangle(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Point3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Parametric coordinates `(r, s)` of `p` projected onto the plane of `abc`,
/// such that the projection is `a + r (b - a) + s (c - a)`.
pub fn triangle_pcoords(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Option<[f64; 2]> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    if denom == 0.0 {
        return None;
    }
    Some([
        (d11 * d20 - d01 * d21) / denom,
        (d00 * d21 - d01 * d20) / denom,
    ])
}

/// Intersects a ray with triangle `abc`.
///
/// The crossing with the triangle's plane must lie in `[t_min, t_max]`; it
/// counts as a hit if it is inside the triangle or within `tol` of it.
/// Degenerate (zero area) triangles are never hit.
pub fn intersect_triangle(
    ray: &Ray,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    t_min: f64,
    t_max: f64,
    tol: f64,
) -> Option<(f64, Point3<f64>)> {
    let plane = Plane::from_triangle(a, b, c)?;
    let t = plane.intersect(ray, t_min, t_max)?;
    let x = ray.at(t);
    let closest = closest_point_on_triangle(&x, a, b, c);
    ((x - closest).norm_squared() <= tol * tol).then_some((t, x))
}

/// Even-odd point in polygon test, performed in the coordinate plane most
/// aligned with `normal`. `p` is assumed to lie (close to) the polygon plane.
pub fn point_in_polygon(p: &Point3<f64>, points: &[Point3<f64>], normal: &Vector3<f64>) -> bool {
    let drop = normal.iamax();
    let (u, v) = match drop {
        0 => (1, 2),
        1 => (2, 0),
        _ => (0, 1),
    };
    let (px, py) = (p[u], p[v]);
    let mut inside = false;
    let n = points.len();
    for i in 0..n {
        let a = &points[i];
        let b = &points[(i + 1) % n];
        let (ax, ay) = (a[u], a[v]);
        let (bx, by) = (b[u], b[v]);
        if (ay > py) != (by > py) {
            let x_cross = ax + (py - ay) / (by - ay) * (bx - ax);
            if px < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Distance from `p` to the boundary of a polygon.
pub fn distance_to_polygon_edges(p: &Point3<f64>, points: &[Point3<f64>]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let q = closest_point_on_segment(p, &points[i], &points[(i + 1) % n]);
            (p - q).norm()
        })
        .fold(f64::INFINITY, f64::min)
}

/// Distance from `p` to a planar polygon (interior included).
pub fn distance_to_polygon(p: &Point3<f64>, points: &[Point3<f64>], plane: &Plane) -> f64 {
    let h = plane.signed_distance(p);
    let projected = p - plane.normal * h;
    if point_in_polygon(&projected, points, &plane.normal) {
        h.abs()
    } else {
        distance_to_polygon_edges(p, points)
    }
}

/// Intersects a ray with a planar polygon of any convexity.
pub fn intersect_polygon(
    ray: &Ray,
    points: &[Point3<f64>],
    t_min: f64,
    t_max: f64,
    tol: f64,
) -> Option<(f64, Point3<f64>)> {
    let plane = Plane::from_polygon(points)?;
    let t = plane.intersect(ray, t_min, t_max)?;
    let x = ray.at(t);
    let hit = point_in_polygon(&x, points, &plane.normal)
        || distance_to_polygon_edges(&x, points) <= tol;
    hit.then_some((t, x))
}

/// Parametric coordinates `(r, s, t)` of `p` in tetrahedron `abcd`, such that
/// `p = a + r (b - a) + s (c - a) + t (d - a)`. `None` for a flat tetrahedron.
pub fn tetra_pcoords(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> Option<[f64; 3]> {
    let m = Matrix3::from_columns(&[b - a, c - a, d - a]);
    let inv = m.try_inverse()?;
    let r = inv * (p - a);
    Some([r.x, r.y, r.z])
}

/// Whether tetrahedral parametric coordinates lie inside the tetrahedron.
pub fn pcoords_in_tetra(pc: &[f64; 3]) -> bool {
    pc.iter().all(|&x| x >= -PCOORD_EPSILON) && pc.iter().sum::<f64>() <= 1.0 + PCOORD_EPSILON
}
