//! The cell tree: a bounding-box hierarchy over the cells of a [`CellStore`].
//!
//! Nodes live in a flat arena. An internal node holds the arena index of its
//! first child and a child count; its children are stored contiguously. A leaf
//! holds a range into a shared array of cell references. With
//! [`Partition::Straddle`] a cell whose box crosses a slab boundary is
//! referenced from every slab it overlaps, so the same cell may appear in
//! several leaves.
//!
//! The tree owns all of its data and never borrows the store. It records the
//! store's modification stamp at build time; [`CellTree::locator`] refuses to
//! hand out a query session once the store has moved on.

use std::fmt;
use std::time::Instant;

use serde::Deserialize;

use crate::bounds::Aabb;
use crate::error::{LocatorError, Result};
use crate::query::Locator;
use crate::store::CellStore;

/// A straddle split may hand out at most this many references per cell of
/// the node; beyond that the node is split by centre instead.
const MAX_STRADDLE_GROWTH: usize = 2;


/// How a node's cells are distributed over the slabs of its split axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// A cell goes to every slab its bounding box overlaps. A node whose
    /// split would more than double its cell references is split by centre.
    Straddle,
    /// A cell goes to the one slab holding its box centre.
    Centroid,
}

/// Parameters of a tree build.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Number of slabs a node is cut into. Values below 2 are raised to 2.
    pub branching_factor: usize,
    /// Maximum number of levels, counting the root as level 1. 0 means no cap.
    pub max_level: usize,
    /// A node with at most this many cells becomes a leaf. At least 1.
    pub cells_per_leaf: usize,
    pub partition: Partition,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            branching_factor: 2,
            max_level: 0,
            cells_per_leaf: 8,
            partition: Partition::Straddle,
        }
    }
}

impl BuildOptions {
    /// Returns the options with out-of-range values clamped.
    pub fn normalized(mut self) -> Self {
        self.branching_factor = self.branching_factor.max(2);
        self.cells_per_leaf = self.cells_per_leaf.max(1);
        self
    }
}

impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "branching factor {}, max level {}, {} cells per leaf, {:?} partition",
            self.branching_factor, self.max_level, self.cells_per_leaf, self.partition
        )
    }
}

/// Arena index of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeIdx(pub(crate) usize);

impl NodeIdx {
    pub(crate) const ROOT: NodeIdx = NodeIdx(0);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Kind {
    /// Cells `cell_refs[start..start + len]`.
    Leaf { start: usize, len: usize },
    /// Children `nodes[first..first + count]`.
    Internal { first: NodeIdx, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Node {
    pub(crate) bounds: Aabb,
    pub(crate) kind: Kind,
}

impl Node {
    fn placeholder() -> Self {
        Self {
            bounds: Aabb::empty(),
            kind: Kind::Leaf { start: 0, len: 0 },
        }
    }
}

/// Shape summary of a built tree.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TreeStats {
    pub nodes: usize,
    pub leaves: usize,
    /// Number of levels, the root being level 1.
    pub depth: usize,
    pub max_leaf_size: usize,
    /// Total number of cell references held by the leaves.
    pub cell_refs: usize,
    /// Cell references per cell. 1.0 when no cell is duplicated.
    pub duplication: f64,
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tree Stats:
  - Nodes: {}
  - Leaves: {}
  - Depth: {}
  - Largest Leaf: {}
  - Cell References: {}
  - Duplication: {:.3}",
            self.nodes, self.leaves, self.depth, self.max_leaf_size, self.cell_refs, self.duplication
        )
    }
}

/// Spatial index over the cells of a [`CellStore`].
#[derive(Debug, Clone)]
pub struct CellTree {
    options: BuildOptions,
    pub(crate) nodes: Vec<Node>,
    pub(crate) cell_refs: Vec<usize>,
    cell_count: usize,
    /// Store stamp of the last successful build.
    built_stamp: Option<u64>,
    options_changed: bool,
    stats: TreeStats,
}

impl CellTree {
    /// An unbuilt tree. Queries are rejected until [`CellTree::rebuild`] succeeds.
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options: options.normalized(),
            nodes: Vec::new(),
            cell_refs: Vec::new(),
            cell_count: 0,
            built_stamp: None,
            options_changed: false,
            stats: TreeStats::default(),
        }
    }

    /// Builds a tree over every cell of `store`.
    pub fn build(store: &CellStore, options: BuildOptions) -> Result<Self> {
        let mut tree = Self::new(options);
        tree.rebuild(store)?;
        Ok(tree)
    }

    /// Discards the current tree and builds a new one from `store`.
    ///
    /// On failure the tree is left unbuilt.
    pub fn rebuild(&mut self, store: &CellStore) -> Result<()> {
        self.clear();

        let n = store.cell_count();
        if n == 0 {
            log::warn!("cannot build cell tree: store has no cells");
            return Err(LocatorError::EmptyDataset);
        }
        log::debug!("building cell tree over {} cells ({})", n, self.options);
        let start = Instant::now();

        let boxes = (0..n)
            .map(|i| store.cell_bounds(i))
            .collect::<Result<Vec<_>>>()?;
        let builder = Builder::new(&boxes, &self.options);
        let (nodes, cell_refs, depth) = builder.run();

        self.nodes = nodes;
        self.cell_refs = cell_refs;
        self.cell_count = n;
        self.built_stamp = Some(store.mtime());
        self.options_changed = false;
        self.stats = self.compute_stats(depth);

        log::debug!("built cell tree in {:?}", start.elapsed());
        log::debug!("{}", self.stats);
        Ok(())
    }

    /// Replaces the build options. Takes effect at the next rebuild or refresh.
    pub fn set_options(&mut self, options: BuildOptions) {
        let options = options.normalized();
        if options != self.options {
            self.options = options;
            self.options_changed = true;
        }
    }

    /// Rebuilds if the options changed or `store` was modified since the last
    /// build. Returns whether a rebuild happened.
    pub fn refresh(&mut self, store: &CellStore) -> Result<bool> {
        if self.options_changed || self.built_stamp != Some(store.mtime()) {
            self.rebuild(store)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Opens a query session over this tree and the store it was built from.
    pub fn locator<'a>(&'a self, store: &'a CellStore) -> Result<Locator<'a>> {
        match self.built_stamp {
            None => Err(LocatorError::NotBuilt),
            Some(built) if built != store.mtime() => Err(LocatorError::StaleIndex {
                built,
                current: store.mtime(),
            }),
            Some(_) => Ok(Locator::new(self, store)),
        }
    }

    pub fn is_built(&self) -> bool {
        self.built_stamp.is_some()
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Number of cells indexed by the last build.
    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    pub fn stats(&self) -> &TreeStats {
        &self.stats
    }

    /// Bounds of the whole tree; empty when unbuilt.
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::empty(), |n| n.bounds)
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.cell_refs.clear();
        self.cell_count = 0;
        self.built_stamp = None;
        self.stats = TreeStats::default();
    }

    fn compute_stats(&self, depth: usize) -> TreeStats {
        let mut leaves = 0;
        let mut max_leaf_size = 0;
        for node in &self.nodes {
            if let Kind::Leaf { len, .. } = node.kind {
                leaves += 1;
                max_leaf_size = max_leaf_size.max(len);
            }
        }
        TreeStats {
            nodes: self.nodes.len(),
            leaves,
            depth,
            max_leaf_size,
            cell_refs: self.cell_refs.len(),
            duplication: self.cell_refs.len() as f64 / self.cell_count as f64,
        }
    }
}

/// Work item: a node slot to fill, the cells that belong under it and its level.
struct Pending {
    node: NodeIdx,
    cells: Vec<usize>,
    level: usize,
}

/// Top-down builder. Nodes are filled from an explicit stack so that deep
/// trees do not exhaust the call stack.
struct Builder<'a> {
    boxes: &'a [Aabb],
    centres: Vec<nalgebra::Point3<f64>>,
    options: &'a BuildOptions,
}

impl<'a> Builder<'a> {
    fn new(boxes: &'a [Aabb], options: &'a BuildOptions) -> Self {
        let centres = boxes.iter().map(|b| b.centre()).collect();
        Self {
            boxes,
            centres,
            options,
        }
    }

    fn run(self) -> (Vec<Node>, Vec<usize>, usize) {
        let mut nodes = vec![Node::placeholder()];
        let mut cell_refs = Vec::with_capacity(self.boxes.len());
        let mut depth = 0;
        let mut stack = vec![Pending {
            node: NodeIdx::ROOT,
            cells: (0..self.boxes.len()).collect(),
            level: 1,
        }];

        while let Some(Pending { node, cells, level }) = stack.pop() {
            depth = depth.max(level);
            let bounds = cells
                .iter()
                .fold(Aabb::empty(), |acc, &c| acc.union(&self.boxes[c]));

            match self.split(&cells, level) {
                None => {
                    let start = cell_refs.len();
                    cell_refs.extend_from_slice(&cells);
                    nodes[node.0] = Node {
                        bounds,
                        kind: Kind::Leaf {
                            start,
                            len: cells.len(),
                        },
                    };
                }
                Some(groups) => {
                    let first = NodeIdx(nodes.len());
                    let count = groups.len();
                    nodes.extend(std::iter::repeat(Node::placeholder()).take(count));
                    nodes[node.0] = Node {
                        bounds,
                        kind: Kind::Internal { first, count },
                    };
                    // reversed so that children are filled in slab order
                    for (k, group) in groups.into_iter().enumerate().rev() {
                        stack.push(Pending {
                            node: NodeIdx(first.0 + k),
                            cells: group,
                            level: level + 1,
                        });
                    }
                }
            }
        }
        (nodes, cell_refs, depth)
    }

    /// Cuts `cells` into at least two non-empty groups, or returns `None`
    /// when the node should be a leaf.
    fn split(&self, cells: &[usize], level: usize) -> Option<Vec<Vec<usize>>> {
        let opts = self.options;
        if cells.len() <= opts.cells_per_leaf || (opts.max_level > 0 && level >= opts.max_level) {
            return None;
        }

        let spread = Aabb::from_points(cells.iter().map(|&c| &self.centres[c]));
        let axis = spread.longest_axis();
        let lo = spread.min[axis];
        let width = spread.max[axis] - lo;
        if !(width > 0.0) {
            return None;
        }
        // slabs beyond the cell count can only be empty
        let slabs = opts.branching_factor.min(cells.len());
        let size = width / slabs as f64;
        let slab_of = |x: f64| (((x - lo) / size).floor().max(0.0) as usize).min(slabs - 1);

        let mut groups = match opts.partition {
            Partition::Straddle => {
                let mut groups = vec![Vec::new(); slabs];
                for &c in cells {
                    let b = &self.boxes[c];
                    for slab in slab_of(b.min[axis])..=slab_of(b.max[axis]) {
                        groups[slab].push(c);
                    }
                }
                let total: usize = groups.iter().map(Vec::len).sum();
                if total > MAX_STRADDLE_GROWTH * cells.len()
                    || groups.iter().any(|g| g.len() == cells.len())
                {
                    self.by_centre(cells, axis, &slab_of, slabs)
                } else {
                    groups
                }
            }
            Partition::Centroid => self.by_centre(cells, axis, &slab_of, slabs),
        };

        groups.retain(|g| !g.is_empty());
        (groups.len() >= 2).then_some(groups)
    }

    fn by_centre(
        &self,
        cells: &[usize],
        axis: usize,
        slab_of: &dyn Fn(f64) -> usize,
        slabs: usize,
    ) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); slabs];
        for &c in cells {
            groups[slab_of(self.centres[c][axis])].push(c);
        }
        groups
    }
}
