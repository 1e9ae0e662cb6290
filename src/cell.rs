//! Mesh cells and their exact geometric predicates.
//!
//! A [`Cell`] is a closed set of linear cell shapes. Every arm provides the
//! same three capabilities: bounds, ray intersection and point location.
//!
//! Point ordering follows the usual linear-cell conventions:
//! - hexahedron: 0-3 counter-clockwise bottom face, 4-7 the top face above them
//! - wedge: 0-2 bottom triangle, 3-5 the top triangle above them
//! - pyramid: 0-3 base quad, 4 apex
//!
//! Ray tests decompose a cell into triangles (or planar polygons for polygon
//! and polyhedron faces). Point location decomposes solids into tetrahedra.

use nalgebra::Point3;

use crate::bounds::Aabb;
use crate::error::{LocatorError, Result};
use crate::geom::{self, Plane};
use crate::ray::Ray;

const TETRA_FACES: [&[usize]; 4] = [&[0, 1, 3], &[1, 2, 3], &[2, 0, 3], &[0, 2, 1]];

const PYRAMID_FACES: [&[usize]; 5] = [&[0, 3, 2, 1], &[0, 1, 4], &[1, 2, 4], &[2, 3, 4], &[3, 0, 4]];

const WEDGE_FACES: [&[usize]; 5] = [
    &[0, 1, 2],
    &[3, 5, 4],
    &[0, 3, 4, 1],
    &[1, 4, 5, 2],
    &[2, 5, 3, 0],
];

const HEXAHEDRON_FACES: [&[usize]; 6] = [
    &[0, 4, 7, 3],
    &[1, 2, 6, 5],
    &[0, 1, 5, 4],
    &[3, 7, 6, 2],
    &[0, 3, 2, 1],
    &[4, 5, 6, 7],
];

const TETRA_TETS: [[usize; 4]; 1] = [[0, 1, 2, 3]];
const PYRAMID_TETS: [[usize; 4]; 2] = [[0, 1, 2, 4], [0, 2, 3, 4]];
const WEDGE_TETS: [[usize; 4]; 3] = [[0, 1, 2, 3], [1, 2, 5, 3], [1, 5, 4, 3]];
// six tetrahedra sharing the 0-6 diagonal
const HEXAHEDRON_TETS: [[usize; 4]; 6] = [
    [0, 1, 2, 6],
    [0, 2, 3, 6],
    [0, 3, 7, 6],
    [0, 7, 4, 6],
    [0, 4, 5, 6],
    [0, 5, 1, 6],
];


/// The shape tag of a [`Cell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Triangle,
    Quad,
    Polygon,
    Tetra,
    Pyramid,
    Wedge,
    Hexahedron,
    Polyhedron,
}

impl CellKind {
    /// Topological dimension: 2 for surface cells, 3 for solids.
    pub fn dimension(&self) -> usize {
        match self {
            CellKind::Triangle | CellKind::Quad | CellKind::Polygon => 2,
            _ => 3,
        }
    }
}

/// A mesh cell: a shape plus point indices into the store's point set.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Triangle([usize; 3]),
    Quad([usize; 4]),
    /// Planar polygon with any number (≥ 3) of vertices, convex or not.
    Polygon(Vec<usize>),
    Tetra([usize; 4]),
    Pyramid([usize; 5]),
    Wedge([usize; 6]),
    Hexahedron([usize; 8]),
    /// General polyhedron. `faces` hold point indices drawn from `points`.
    /// Point location assumes the cell is star-shaped about its vertex centroid.
    Polyhedron {
        points: Vec<usize>,
        faces: Vec<Vec<usize>>,
    },
}

/// Where a point lies inside a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Containment {
    /// Sub-simplex (triangle or tetrahedron of the cell's decomposition) holding the point.
    pub sub_id: usize,
    /// Parametric coordinates within that sub-simplex.
    pub pcoords: [f64; 3],
}

impl Cell {
    pub fn kind(&self) -> CellKind {
        match self {
            Cell::Triangle(_) => CellKind::Triangle,
            Cell::Quad(_) => CellKind::Quad,
            Cell::Polygon(_) => CellKind::Polygon,
            Cell::Tetra(_) => CellKind::Tetra,
            Cell::Pyramid(_) => CellKind::Pyramid,
            Cell::Wedge(_) => CellKind::Wedge,
            Cell::Hexahedron(_) => CellKind::Hexahedron,
            Cell::Polyhedron { .. } => CellKind::Polyhedron,
        }
    }

    /// Ordered point indices of the cell.
    pub fn point_ids(&self) -> &[usize] {
        match self {
            Cell::Triangle(ids) => ids,
            Cell::Quad(ids) => ids,
            Cell::Polygon(ids) => ids,
            Cell::Tetra(ids) => ids,
            Cell::Pyramid(ids) => ids,
            Cell::Wedge(ids) => ids,
            Cell::Hexahedron(ids) => ids,
            Cell::Polyhedron { points, .. } => points,
        }
    }

    /// Checks connectivity against a point set of `point_count` points.
    /// `index` is the position the cell has (or will have) in its store.
    pub fn validate(&self, point_count: usize, index: usize) -> Result<()> {
        if let Some(&point) = self.point_ids().iter().find(|&&p| p >= point_count) {
            return Err(LocatorError::InvalidPointIndex {
                cell: index,
                point,
                count: point_count,
            });
        }
        match self {
            Cell::Polygon(ids) if ids.len() < 3 => Err(LocatorError::InvalidCell {
                reason: format!("polygon {} has {} points, needs at least 3", index, ids.len()),
            }),
            Cell::Polyhedron { points, faces } => {
                if faces.len() < 4 {
                    return Err(LocatorError::InvalidCell {
                        reason: format!("polyhedron {} has {} faces, needs at least 4", index, faces.len()),
                    });
                }
                for face in faces {
                    if face.len() < 3 {
                        return Err(LocatorError::InvalidCell {
                            reason: format!("polyhedron {} has a face with {} points", index, face.len()),
                        });
                    }
                    if let Some(p) = face.iter().find(|p| !points.contains(p)) {
                        return Err(LocatorError::InvalidCell {
                            reason: format!("polyhedron {} face uses point {} not in the cell", index, p),
                        });
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn bounds(&self, points: &[Point3<f64>]) -> Aabb {
        Aabb::from_points(self.point_ids().iter().map(|&i| &points[i]))
    }

    /// Closest intersection of the ray with this cell within `[t_min, t_max]`.
    ///
    /// Returns `(t, point, sub_id)`, where `sub_id` is the triangle index for
    /// quads and the face index for solids. Ties go to the lower sub id.
    pub fn intersect_ray(
        &self,
        points: &[Point3<f64>],
        ray: &Ray,
        t_min: f64,
        t_max: f64,
        tol: f64,
    ) -> Option<(f64, Point3<f64>, usize)> {
        let mut best: Option<(f64, Point3<f64>, usize)> = None;
        let mut consider = |hit: Option<(f64, Point3<f64>)>, sub_id: usize| {
            if let Some((t, x)) = hit {
                if best.map_or(true, |(bt, _, _)| t < bt) {
                    best = Some((t, x, sub_id));
                }
            }
        };
        let ids = self.point_ids();
        let p = |k: usize| &points[ids[k]];
        match self {
            Cell::Triangle(_) => {
                consider(geom::intersect_triangle(ray, p(0), p(1), p(2), t_min, t_max, tol), 0);
            }
            Cell::Quad(_) => {
                consider(geom::intersect_triangle(ray, p(0), p(1), p(2), t_min, t_max, tol), 0);
                consider(geom::intersect_triangle(ray, p(0), p(2), p(3), t_min, t_max, tol), 1);
            }
            Cell::Polygon(_) => {
                let coords = gather(points, ids);
                consider(geom::intersect_polygon(ray, &coords, t_min, t_max, tol), 0);
            }
            Cell::Tetra(_) | Cell::Pyramid(_) | Cell::Wedge(_) | Cell::Hexahedron(_) => {
                for (face_id, face) in self.local_faces().iter().enumerate() {
                    let hit = intersect_face(ray, points, ids, face, t_min, t_max, tol);
                    consider(hit, face_id);
                }
            }
            Cell::Polyhedron { faces, .. } => {
                for (face_id, face) in faces.iter().enumerate() {
                    let coords = gather(points, face);
                    consider(geom::intersect_polygon(ray, &coords, t_min, t_max, tol), face_id);
                }
            }
        }
        best
    }

    /// Locates `x` in the cell. Surface cells accept points within `tol` of
    /// the surface; solids accept interior points and points within `tol` of
    /// their boundary.
    pub fn locate(&self, points: &[Point3<f64>], x: &Point3<f64>, tol: f64) -> Option<Containment> {
        let ids = self.point_ids();
        let p = |k: usize| &points[ids[k]];
        match self {
            Cell::Triangle(_) => locate_in_triangle(x, p(0), p(1), p(2), tol, 0),
            Cell::Quad(_) => {
                let a = locate_in_triangle(x, p(0), p(1), p(2), tol, 0);
                let b = locate_in_triangle(x, p(0), p(2), p(3), tol, 1);
                a.or(b)
            }
            Cell::Polygon(_) => {
                let coords = gather(points, ids);
                let plane = Plane::from_polygon(&coords)?;
                if geom::distance_to_polygon(x, &coords, &plane) > tol {
                    return None;
                }
                locate_in_fan(x, &coords)
            }
            Cell::Tetra(_) => self.locate_in_tets(points, x, tol, &TETRA_TETS),
            Cell::Pyramid(_) => self.locate_in_tets(points, x, tol, &PYRAMID_TETS),
            Cell::Wedge(_) => self.locate_in_tets(points, x, tol, &WEDGE_TETS),
            Cell::Hexahedron(_) => self.locate_in_tets(points, x, tol, &HEXAHEDRON_TETS),
            Cell::Polyhedron { points: cell_points, faces } => {
                let c = geom::centroid(&gather(points, cell_points));
                let tets: Vec<[Point3<f64>; 4]> = faces
                    .iter()
                    .flat_map(|face| {
                        (1..face.len() - 1).map(move |k| {
                            [points[face[0]], points[face[k]], points[face[k + 1]], c]
                        })
                    })
                    .collect();
                locate_in_tet_list(&tets, x).or_else(|| {
                    let d = faces
                        .iter()
                        .map(|face| {
                            let coords = gather(points, face);
                            Plane::from_polygon(&coords)
                                .map_or(f64::INFINITY, |plane| geom::distance_to_polygon(x, &coords, &plane))
                        })
                        .fold(f64::INFINITY, f64::min);
                    (d <= tol).then(|| nearest_tet(&tets, x))
                })
            }
        }
    }

    /// Face tables (in local point numbering) of the fixed-size solids.
    fn local_faces(&self) -> &'static [&'static [usize]] {
        match self {
            Cell::Tetra(_) => &TETRA_FACES,
            Cell::Pyramid(_) => &PYRAMID_FACES,
            Cell::Wedge(_) => &WEDGE_FACES,
            Cell::Hexahedron(_) => &HEXAHEDRON_FACES,
            _ => &[],
        }
    }

    fn locate_in_tets(
        &self,
        points: &[Point3<f64>],
        x: &Point3<f64>,
        tol: f64,
        decomposition: &[[usize; 4]],
    ) -> Option<Containment> {
        let ids = self.point_ids();
        let tets: Vec<[Point3<f64>; 4]> = decomposition
            .iter()
            .map(|t| [points[ids[t[0]]], points[ids[t[1]]], points[ids[t[2]]], points[ids[t[3]]]])
            .collect();
        if let Some(found) = locate_in_tet_list(&tets, x) {
            return Some(found);
        }
        if tol <= 0.0 {
            return None;
        }
        let d = self
            .local_faces()
            .iter()
            .map(|face| face_distance(x, points, ids, face))
            .fold(f64::INFINITY, f64::min);
        (d <= tol).then(|| nearest_tet(&tets, x))
    }
}

fn gather(points: &[Point3<f64>], ids: &[usize]) -> Vec<Point3<f64>> {
    ids.iter().map(|&i| points[i]).collect()
}

/// Ray test against a triangular or quadrilateral face given in local numbering.
fn intersect_face(
    ray: &Ray,
    points: &[Point3<f64>],
    ids: &[usize],
    face: &[usize],
    t_min: f64,
    t_max: f64,
    tol: f64,
) -> Option<(f64, Point3<f64>)> {
    let p = |k: usize| &points[ids[face[k]]];
    let first = geom::intersect_triangle(ray, p(0), p(1), p(2), t_min, t_max, tol);
    if face.len() == 3 {
        return first;
    }
    let second = geom::intersect_triangle(ray, p(0), p(2), p(3), t_min, t_max, tol);
    match (first, second) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

fn face_distance(x: &Point3<f64>, points: &[Point3<f64>], ids: &[usize], face: &[usize]) -> f64 {
    let p = |k: usize| &points[ids[face[k]]];
    let d1 = (x - geom::closest_point_on_triangle(x, p(0), p(1), p(2))).norm();
    if face.len() == 3 {
        return d1;
    }
    let d2 = (x - geom::closest_point_on_triangle(x, p(0), p(2), p(3))).norm();
    d1.min(d2)
}

fn locate_in_triangle(
    x: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    tol: f64,
    sub_id: usize,
) -> Option<Containment> {
    let closest = geom::closest_point_on_triangle(x, a, b, c);
    if (x - closest).norm_squared() > tol * tol {
        return None;
    }
    let [r, s] = geom::triangle_pcoords(x, a, b, c)?;
    Some(Containment {
        sub_id,
        pcoords: [r, s, 0.0],
    })
}

/// Fan triangle `(0, k, k + 1)` of a polygon nearest to `x`, with the
/// parametric coordinates of `x` in it. Ties go to the lower fan index.
fn locate_in_fan(x: &Point3<f64>, coords: &[Point3<f64>]) -> Option<Containment> {
    let mut best: Option<(f64, usize)> = None;
    for k in 1..coords.len() - 1 {
        let closest = geom::closest_point_on_triangle(x, &coords[0], &coords[k], &coords[k + 1]);
        let d = (x - closest).norm_squared();
        if best.map_or(true, |(bd, _)| d < bd) {
            best = Some((d, k));
        }
    }
    let (_, k) = best?;
    let [r, s] = geom::triangle_pcoords(x, &coords[0], &coords[k], &coords[k + 1])?;
    Some(Containment {
        sub_id: k - 1,
        pcoords: [r, s, 0.0],
    })
}

fn locate_in_tet_list(tets: &[[Point3<f64>; 4]], x: &Point3<f64>) -> Option<Containment> {
    tets.iter().enumerate().find_map(|(sub_id, [a, b, c, d])| {
        let pc = geom::tetra_pcoords(x, a, b, c, d)?;
        geom::pcoords_in_tetra(&pc).then_some(Containment { sub_id, pcoords: pc })
    })
}

/// Tetrahedron whose parametric coordinates are least outside their valid range.
fn nearest_tet(tets: &[[Point3<f64>; 4]], x: &Point3<f64>) -> Containment {
    let mut best = Containment {
        sub_id: 0,
        pcoords: [0.0; 3],
    };
    let mut best_violation = f64::INFINITY;
    for (sub_id, [a, b, c, d]) in tets.iter().enumerate() {
        let Some(pc) = geom::tetra_pcoords(x, a, b, c, d) else {
            continue;
        };
        let violation = pc
            .iter()
            .map(|v| -v)
            .chain(std::iter::once(pc.iter().sum::<f64>() - 1.0))
            .fold(0.0_f64, f64::max);
        if violation < best_violation {
            best_violation = violation;
            best = Containment { sub_id, pcoords: pc };
        }
    }
    best
}
