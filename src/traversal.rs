//! Depth-first candidate enumeration over a built [`CellTree`].
//!
//! Both iterators walk the arena with a LIFO work list seeded with the root,
//! skip nodes whose box misses the query, and at the leaves test each
//! referenced cell against its own bounding box. A cell referenced from several
//! leaves is reported once per query.
//!
//! Candidates are only *possible* answers: the exact per-cell tests live in
//! [`crate::cell`] and are applied by [`crate::query::Locator`].

use std::collections::HashSet;
use std::ops::Range;

use crate::bounds::Aabb;
use crate::ray::Ray;
use crate::store::CellStore;
use crate::tree::{CellTree, Kind, NodeIdx};


/// Resumable depth-first walk shared by the candidate iterators.
#[derive(Debug, Clone)]
struct Walk {
    stack: Vec<NodeIdx>,
    leaf: Range<usize>,
    seen: HashSet<usize>,
}

impl Walk {
    fn new(tree: &CellTree) -> Self {
        let mut walk = Self {
            stack: Vec::new(),
            leaf: 0..0,
            seen: HashSet::new(),
        };
        walk.reset(tree);
        walk
    }

    fn reset(&mut self, tree: &CellTree) {
        self.stack.clear();
        self.seen.clear();
        self.leaf = 0..0;
        if !tree.nodes.is_empty() {
            self.stack.push(NodeIdx::ROOT);
        }
    }

    /// Next cell whose box passes `test`, reached through nodes whose boxes
    /// also pass it.
    fn next_cell<F>(&mut self, tree: &CellTree, store: &CellStore, test: F) -> Option<usize>
    where
        F: Fn(&Aabb) -> bool,
    {
        loop {
            while let Some(slot) = self.leaf.next() {
                let cell = tree.cell_refs[slot];
                if !self.seen.insert(cell) {
                    continue;
                }
                if store.cell_bounds(cell).map_or(false, |b| test(&b)) {
                    return Some(cell);
                }
            }

            let node = tree.nodes[self.stack.pop()?.0];
            if !test(&node.bounds) {
                continue;
            }
            match node.kind {
                Kind::Leaf { start, len } => self.leaf = start..start + len,
                Kind::Internal { first, count } => {
                    self.stack
                        .extend((0..count).rev().map(|k| NodeIdx(first.0 + k)));
                }
            }
        }
    }
}

/// Cells whose bounds, grown by the tolerance, are crossed by a ray within
/// its parametric range.
#[derive(Debug, Clone)]
pub struct RayCandidates<'a> {
    tree: &'a CellTree,
    store: &'a CellStore,
    ray: Ray,
    t_min: f64,
    t_max: f64,
    tol: f64,
    walk: Walk,
}

impl<'a> RayCandidates<'a> {
    pub(crate) fn new(
        tree: &'a CellTree,
        store: &'a CellStore,
        ray: Ray,
        t_min: f64,
        t_max: f64,
        tol: f64,
    ) -> Self {
        Self {
            tree,
            store,
            ray,
            t_min,
            t_max,
            tol,
            walk: Walk::new(tree),
        }
    }
}

impl Iterator for RayCandidates<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let (ray, t_min, t_max, tol) = (self.ray, self.t_min, self.t_max, self.tol);
        self.walk.next_cell(self.tree, self.store, |b| {
            b.inflated(tol).ray_range(&ray, t_min, t_max).is_some()
        })
    }
}

/// Lazily enumerates the cells whose bounds intersect a box.
///
/// The sequence is finite, reports each cell once and can be replayed with
/// [`RegionCells::restart`].
#[derive(Debug, Clone)]
pub struct RegionCells<'a> {
    tree: &'a CellTree,
    store: &'a CellStore,
    region: Aabb,
    walk: Walk,
}

impl<'a> RegionCells<'a> {
    pub(crate) fn new(tree: &'a CellTree, store: &'a CellStore, region: Aabb) -> Self {
        Self {
            tree,
            store,
            region,
            walk: Walk::new(tree),
        }
    }

    /// Rewinds to the first cell.
    pub fn restart(&mut self) {
        self.walk.reset(self.tree);
    }

    pub fn region(&self) -> &Aabb {
        &self.region
    }
}

impl Iterator for RegionCells<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let region = self.region;
        self.walk
            .next_cell(self.tree, self.store, |b| b.intersects(&region))
    }
}

/// Cells whose bounds lie within `tol` of `p`.
pub(crate) fn point_candidates<'a>(
    tree: &'a CellTree,
    store: &'a CellStore,
    p: &nalgebra::Point3<f64>,
    tol: f64,
) -> RegionCells<'a> {
    RegionCells::new(tree, store, Aabb::new(*p, *p).inflated(tol))
}
