//! Query sessions over a built tree and the store it indexes.
//!
//! A [`Locator`] borrows both the tree and the store, so the store cannot be
//! edited while a session is alive. It is `Copy` and `Sync`: share it freely
//! across threads, every query keeps its own traversal state.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use nalgebra::Point3;

use crate::bounds::Aabb;
use crate::ray::{Ray, RayHit};
use crate::store::CellStore;
use crate::traversal::{self, RayCandidates, RegionCells};
use crate::tree::{CellTree, Kind, NodeIdx};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::tree::{BuildOptions, Partition};
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_point(rng: &mut StdRng, half: f64) -> Point3<f64> {
        Point3::new(
            rng.random_range(-half..half),
            rng.random_range(-half..half),
            rng.random_range(-half..half),
        )
    }

    /// Small triangles scattered through a 10 x 10 x 10 box.
    fn triangle_soup(seed: u64, count: usize) -> CellStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = CellStore::new();
        for _ in 0..count {
            let c = random_point(&mut rng, 5.0);
            let ids = [0; 3].map(|_| {
                let offset = random_point(&mut rng, 0.5);
                store.add_point(c + offset.coords)
            });
            store.add_cell(Cell::Triangle(ids)).unwrap();
        }
        store
    }

    /// Small tetrahedra scattered through a 10 x 10 x 10 box.
    fn tetra_soup(seed: u64, count: usize) -> CellStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = CellStore::new();
        for _ in 0..count {
            let c = random_point(&mut rng, 5.0);
            let ids = [0; 4].map(|_| {
                let offset = random_point(&mut rng, 1.0);
                store.add_point(c + offset.coords)
            });
            store.add_cell(Cell::Tetra(ids)).unwrap();
        }
        store
    }

    fn random_rays(seed: u64, count: usize) -> Vec<Ray> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let origin = random_point(&mut rng, 6.0);
                let direction = random_point(&mut rng, 1.0).coords;
                Ray::new(origin, direction)
            })
            .collect()
    }

    fn brute_closest(store: &CellStore, ray: &Ray, t_max: f64, tol: f64) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        for (cell, shape) in store.cells().iter().enumerate() {
            if let Some((t, point, sub_id)) = shape.intersect_ray(store.points(), ray, 0.0, t_max, tol) {
                let hit = RayHit {
                    t,
                    point,
                    cell,
                    sub_id,
                };
                if best.map_or(true, |b| hit.precedes(&b)) {
                    best = Some(hit);
                }
            }
        }
        best
    }

    fn all_options() -> Vec<BuildOptions> {
        let mut out = Vec::new();
        for b in [2, 3, 5, 16] {
            for partition in [Partition::Straddle, Partition::Centroid] {
                out.push(BuildOptions {
                    branching_factor: b,
                    cells_per_leaf: 4,
                    partition,
                    ..Default::default()
                });
            }
        }
        out
    }

    #[test]
    fn closest_hit_matches_brute_force() {
        let store = triangle_soup(7, 300);
        let rays = random_rays(11, 200);
        let mut hits = 0;
        for opts in all_options() {
            let tree = CellTree::build(&store, opts).unwrap();
            let locator = tree.locator(&store).unwrap();
            for tol in [0.0, 0.05] {
                for ray in &rays {
                    let expected = brute_closest(&store, ray, 20.0, tol);
                    let found = locator.intersect_ray(ray, 0.0, 20.0, tol);
                    assert_eq!(found, expected);
                    hits += found.is_some() as usize;
                }
            }
        }
        assert!(hits > 0, "test rays never hit anything");
    }

    #[test]
    fn ray_hits_are_complete_and_sorted() {
        let store = triangle_soup(3, 200);
        let tree = CellTree::build(&store, BuildOptions::default()).unwrap();
        let locator = tree.locator(&store).unwrap();
        for ray in random_rays(5, 100) {
            let hits = locator.intersect_ray_all(&ray, 0.0, 20.0, 0.0);
            let expected: Vec<usize> = (0..store.cell_count())
                .filter(|&c| {
                    store.cells()[c]
                        .intersect_ray(store.points(), &ray, 0.0, 20.0, 0.0)
                        .is_some()
                })
                .collect();
            let mut cells: Vec<usize> = hits.iter().map(|h| h.cell).collect();
            cells.sort_unstable();
            assert_eq!(cells, expected);
            assert!(hits.windows(2).all(|w| w[0].t <= w[1].t));
            if let Some(first) = hits.first() {
                assert_eq!(locator.intersect_ray(&ray, 0.0, 20.0, 0.0), Some(*first));
            }
        }
    }

    #[test]
    fn segment_uses_unit_parameter_range() {
        let mut store = CellStore::new();
        let a = store.add_point(Point3::new(-1.0, -1.0, 2.0));
        let b = store.add_point(Point3::new(1.0, -1.0, 2.0));
        let c = store.add_point(Point3::new(0.0, 1.0, 2.0));
        store.add_cell(Cell::Triangle([a, b, c])).unwrap();
        let tree = CellTree::build(&store, BuildOptions::default()).unwrap();
        let locator = tree.locator(&store).unwrap();

        let hit = locator
            .intersect_segment(Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 4.0), 0.0)
            .unwrap();
        assert!((hit.t - 0.5).abs() < 1e-12);
        assert!((hit.point - Point3::new(0.0, 0.0, 2.0)).norm() < 1e-12);
        assert_eq!(hit.cell, 0);

        // stops short of the plane
        let miss = locator.intersect_segment(Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 1.9), 0.0);
        assert_eq!(miss, None);
    }

    #[test]
    fn negative_tolerance_acts_as_zero() {
        let store = triangle_soup(13, 200);
        let tree = CellTree::build(&store, BuildOptions::default()).unwrap();
        let locator = tree.locator(&store).unwrap();
        let mut hits = 0;
        for ray in random_rays(19, 150) {
            let found = locator.intersect_ray(&ray, 0.0, 20.0, -0.5);
            assert_eq!(found, brute_closest(&store, &ray, 20.0, 0.0));
            assert_eq!(found, locator.intersect_ray(&ray, 0.0, 20.0, 0.0));
            assert_eq!(
                locator.intersect_ray_all(&ray, 0.0, 20.0, -0.5),
                locator.intersect_ray_all(&ray, 0.0, 20.0, 0.0)
            );
            hits += found.is_some() as usize;
        }
        assert!(hits > 0);

        let p = *store.point(0).unwrap();
        assert_eq!(locator.find_cells(&p, -1.0), locator.find_cells(&p, 0.0));
    }

    #[test]
    fn degenerate_ray_never_hits() {
        let store = triangle_soup(1, 20);
        let tree = CellTree::build(&store, BuildOptions::default()).unwrap();
        let locator = tree.locator(&store).unwrap();
        let ray = Ray::new(*store.point(0).unwrap(), Vector3::zeros());
        assert_eq!(locator.intersect_ray(&ray, 0.0, 1.0, 0.1), None);
        assert!(locator.intersect_ray_all(&ray, 0.0, 1.0, 0.1).is_empty());
    }

    #[test]
    fn coplanar_duplicates_resolve_to_lowest_index() {
        let mut store = CellStore::new();
        let a = store.add_point(Point3::new(-1.0, -1.0, 1.0));
        let b = store.add_point(Point3::new(1.0, -1.0, 1.0));
        let c = store.add_point(Point3::new(0.0, 1.0, 1.0));
        for _ in 0..12 {
            store.add_cell(Cell::Triangle([a, b, c])).unwrap();
        }
        let opts = BuildOptions {
            cells_per_leaf: 1,
            ..Default::default()
        };
        let tree = CellTree::build(&store, opts).unwrap();
        let ray = Ray::new(Point3::origin(), Vector3::z());
        let hit = tree.locator(&store).unwrap().intersect_ray(&ray, 0.0, 5.0, 0.0).unwrap();
        assert_eq!(hit.cell, 0);
    }

    #[test]
    fn point_location_matches_brute_force() {
        let store = tetra_soup(21, 150);
        let mut rng = StdRng::seed_from_u64(99);
        let points: Vec<Point3<f64>> = (0..500).map(|_| random_point(&mut rng, 5.5)).collect();
        let mut found_any = false;
        for opts in all_options() {
            let tree = CellTree::build(&store, opts).unwrap();
            let locator = tree.locator(&store).unwrap();
            for p in &points {
                let expected: Vec<usize> = (0..store.cell_count())
                    .filter(|&c| store.cells()[c].locate(store.points(), p, 0.01).is_some())
                    .collect();
                let found: Vec<usize> = locator.find_cells(p, 0.01).iter().map(|h| h.cell).collect();
                assert_eq!(found, expected);
                assert_eq!(locator.find_cell(p, 0.01).map(|h| h.cell), expected.first().copied());
                found_any |= !found.is_empty();
            }
        }
        assert!(found_any);
    }

    #[test]
    fn find_cell_reports_parametric_coordinates() {
        let mut store = CellStore::new();
        for p in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ] {
            store.add_point(p);
        }
        store.add_cell(Cell::Tetra([0, 1, 2, 3])).unwrap();
        let tree = CellTree::build(&store, BuildOptions::default()).unwrap();
        let locator = tree.locator(&store).unwrap();

        let hit = locator.find_cell(&Point3::new(0.1, 0.2, 0.3), 0.0).unwrap();
        assert_eq!(hit.cell, 0);
        assert_eq!(hit.sub_id, 0);
        let expected = [0.1, 0.2, 0.3];
        for k in 0..3 {
            assert!((hit.pcoords[k] - expected[k]).abs() < 1e-12);
        }
        assert!(locator.find_cell(&Point3::new(1.0, 1.0, 1.0), 0.0).is_none());
    }

    #[test]
    fn region_query_through_locator() {
        let store = triangle_soup(17, 100);
        let tree = CellTree::build(&store, BuildOptions::default()).unwrap();
        let locator = tree.locator(&store).unwrap();
        let region = Aabb::new(Point3::new(-2.0, -2.0, -2.0), Point3::new(2.0, 2.0, 2.0));
        let mut found: Vec<usize> = locator.cells_in_region(&region).collect();
        found.sort_unstable();
        let expected: Vec<usize> = (0..store.cell_count())
            .filter(|&c| store.cell_bounds(c).unwrap().intersects(&region))
            .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn concurrent_queries_agree_with_sequential() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Locator<'static>>();

        let store = triangle_soup(29, 300);
        let tree = CellTree::build(&store, BuildOptions::default()).unwrap();
        let locator = tree.locator(&store).unwrap();
        let rays = random_rays(31, 300);
        let sequential: Vec<Option<RayHit>> = rays
            .iter()
            .map(|r| locator.intersect_ray(r, 0.0, 20.0, 0.01))
            .collect();

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| rays.iter().map(|r| locator.intersect_ray(r, 0.0, 20.0, 0.01)).collect::<Vec<_>>()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), sequential);
            }
        });
    }
}

/// A point located inside a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointHit {
    /// Index of the containing cell.
    pub cell: usize,
    /// Sub-simplex of the cell's decomposition holding the point.
    pub sub_id: usize,
    /// Parametric coordinates within that sub-simplex.
    pub pcoords: [f64; 3],
}

/// Negative (and NaN) tolerances act as zero.
fn clamp_tolerance(tol: f64) -> f64 {
    tol.max(0.0)
}

/// Pending node of the closest-hit search, ordered so that the heap pops the
/// smallest entry parameter first.
#[derive(Debug, Clone, Copy)]
struct Entry {
    t: f64,
    node: NodeIdx,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .t
            .total_cmp(&self.t)
            .then_with(|| other.node.0.cmp(&self.node.0))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

/// Read-only query session binding a [`CellTree`] to its [`CellStore`].
///
/// Obtained from [`CellTree::locator`], which checks that the tree is built
/// and up to date with the store.
#[derive(Debug, Clone, Copy)]
pub struct Locator<'a> {
    tree: &'a CellTree,
    store: &'a CellStore,
}

impl<'a> Locator<'a> {
    pub(crate) fn new(tree: &'a CellTree, store: &'a CellStore) -> Self {
        Self { tree, store }
    }

    pub fn tree(&self) -> &'a CellTree {
        self.tree
    }

    pub fn store(&self) -> &'a CellStore {
        self.store
    }

    /// Closest intersection of `ray` with any cell for `t` in `[t_min, t_max]`.
    ///
    /// A cell is hit when the ray meets one of its sub-primitives, or passes
    /// within `tol` of it in the primitive's plane. Nodes are visited in order
    /// of the parameter at which the ray enters their box, and the search
    /// stops once no pending node can hold a closer hit. Equal parameters are
    /// resolved in favour of the lower cell index, then the lower sub id.
    pub fn intersect_ray(&self, ray: &Ray, t_min: f64, t_max: f64, tol: f64) -> Option<RayHit> {
        let tol = clamp_tolerance(tol);
        if ray.is_degenerate() || !(t_min <= t_max) {
            return None;
        }
        let nodes = &self.tree.nodes;
        let entry = |node: NodeIdx, limit: f64| {
            nodes[node.0]
                .bounds
                .inflated(tol)
                .ray_range(ray, t_min, limit)
                .map(|(t, _)| Entry { t, node })
        };

        let mut heap = BinaryHeap::new();
        heap.extend(entry(NodeIdx::ROOT, t_max));
        let mut seen = HashSet::new();
        let mut best: Option<RayHit> = None;

        while let Some(Entry { t, node }) = heap.pop() {
            if best.map_or(false, |b| t > b.t) {
                break;
            }
            let limit = best.map_or(t_max, |b| b.t);
            match nodes[node.0].kind {
                Kind::Internal { first, count } => {
                    heap.extend((0..count).filter_map(|k| entry(NodeIdx(first.0 + k), limit)));
                }
                Kind::Leaf { start, len } => {
                    for &cell in &self.tree.cell_refs[start..start + len] {
                        if !seen.insert(cell) {
                            continue;
                        }
                        if let Some(hit) = self.hit_cell(cell, ray, t_min, limit, tol) {
                            if best.map_or(true, |b| hit.precedes(&b)) {
                                best = Some(hit);
                            }
                        }
                    }
                }
            }
        }
        best
    }

    /// Closest intersection with the segment from `p1` to `p2`. The hit's `t`
    /// runs from 0 at `p1` to 1 at `p2`.
    pub fn intersect_segment(&self, p1: Point3<f64>, p2: Point3<f64>, tol: f64) -> Option<RayHit> {
        self.intersect_ray(&Ray::from_segment(p1, p2), 0.0, 1.0, tol)
    }

    /// Every cell the ray hits within `[t_min, t_max]`, one hit per cell (its
    /// closest), sorted by `t`.
    pub fn intersect_ray_all(&self, ray: &Ray, t_min: f64, t_max: f64, tol: f64) -> Vec<RayHit> {
        let tol = clamp_tolerance(tol);
        if ray.is_degenerate() || !(t_min <= t_max) {
            return Vec::new();
        }
        let mut hits: Vec<RayHit> = self
            .ray_candidates(ray, t_min, t_max, tol)
            .filter_map(|cell| self.hit_cell(cell, ray, t_min, t_max, tol))
            .collect();
        hits.sort_by(|a, b| {
            a.t.total_cmp(&b.t)
                .then(a.cell.cmp(&b.cell))
                .then(a.sub_id.cmp(&b.sub_id))
        });
        hits
    }

    /// Cells whose bounds, grown by `tol`, the ray crosses within `[t_min, t_max]`.
    pub fn ray_candidates(&self, ray: &Ray, t_min: f64, t_max: f64, tol: f64) -> RayCandidates<'a> {
        RayCandidates::new(self.tree, self.store, *ray, t_min, t_max, clamp_tolerance(tol))
    }

    /// A cell containing `p`, or within `tol` of it. When several cells
    /// qualify the lowest cell index is returned.
    pub fn find_cell(&self, p: &Point3<f64>, tol: f64) -> Option<PointHit> {
        let tol = clamp_tolerance(tol);
        traversal::point_candidates(self.tree, self.store, p, tol)
            .filter_map(|cell| self.locate_in(cell, p, tol))
            .min_by_key(|hit| hit.cell)
    }

    /// Every cell containing `p` (within `tol`), sorted by cell index.
    pub fn find_cells(&self, p: &Point3<f64>, tol: f64) -> Vec<PointHit> {
        let tol = clamp_tolerance(tol);
        let mut hits: Vec<PointHit> = traversal::point_candidates(self.tree, self.store, p, tol)
            .filter_map(|cell| self.locate_in(cell, p, tol))
            .collect();
        hits.sort_by_key(|hit| hit.cell);
        hits
    }

    /// Cells whose bounds intersect `region`.
    pub fn cells_in_region(&self, region: &Aabb) -> RegionCells<'a> {
        RegionCells::new(self.tree, self.store, *region)
    }

    fn hit_cell(&self, cell: usize, ray: &Ray, t_min: f64, t_max: f64, tol: f64) -> Option<RayHit> {
        let shape = self.store.cell(cell).ok()?;
        let (t, point, sub_id) = shape.intersect_ray(self.store.points(), ray, t_min, t_max, tol)?;
        Some(RayHit {
            t,
            point,
            cell,
            sub_id,
        })
    }

    fn locate_in(&self, cell: usize, p: &Point3<f64>, tol: f64) -> Option<PointHit> {
        let shape = self.store.cell(cell).ok()?;
        let found = shape.locate(self.store.points(), p, tol)?;
        Some(PointHit {
            cell,
            sub_id: found.sub_id,
            pcoords: found.pcoords,
        })
    }
}
