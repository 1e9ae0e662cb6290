//! The cell store: points, cells and memoized cell bounds.
//!
//! The store is what a [`crate::tree::CellTree`] is built over and queried
//! against. It is owned by the caller; the tree only remembers the store's
//! modification stamp so that querying after an edit can be detected.
//!
//! Every mutation draws a fresh stamp from a process-wide counter, so stamps
//! are unique across stores as well as across edits of one store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use nalgebra::Point3;

use crate::bounds::Aabb;
use crate::cell::{Cell, CellKind};
use crate::error::{LocatorError, Result};

static MODIFICATION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_stamp() -> u64 {
    MODIFICATION_COUNTER.fetch_add(1, Ordering::Relaxed)
}


/// Points and cells of a mesh, with optional per-cell bounds memoization.
#[derive(Debug, Clone)]
pub struct CellStore {
    points: Vec<Point3<f64>>,
    cells: Vec<Cell>,
    cache_bounds: bool,
    bounds: Vec<OnceLock<Aabb>>,
    mtime: u64,
}

impl Default for CellStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CellStore {
    /// An empty store with bounds caching enabled.
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            cells: Vec::new(),
            cache_bounds: true,
            bounds: Vec::new(),
            mtime: next_stamp(),
        }
    }

    /// Builds a store from existing point and cell arrays, validating every cell.
    pub fn from_parts(points: Vec<Point3<f64>>, cells: Vec<Cell>) -> Result<Self> {
        for (i, cell) in cells.iter().enumerate() {
            cell.validate(points.len(), i)?;
        }
        let bounds = (0..cells.len()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            points,
            cells,
            cache_bounds: true,
            bounds,
            mtime: next_stamp(),
        })
    }

    /// Appends a point and returns its index.
    pub fn add_point(&mut self, p: Point3<f64>) -> usize {
        self.points.push(p);
        self.modified();
        self.points.len() - 1
    }

    /// Moves an existing point. Cached bounds are discarded.
    pub fn set_point(&mut self, index: usize, p: Point3<f64>) -> Result<()> {
        let count = self.points.len();
        let slot = self
            .points
            .get_mut(index)
            .ok_or(LocatorError::OutOfRange { index, count })?;
        *slot = p;
        self.reset_bounds();
        self.modified();
        Ok(())
    }

    /// Appends a cell after checking its connectivity; returns its index.
    pub fn add_cell(&mut self, cell: Cell) -> Result<usize> {
        cell.validate(self.points.len(), self.cells.len())?;
        self.cells.push(cell);
        self.bounds.push(OnceLock::new());
        self.modified();
        Ok(self.cells.len() - 1)
    }

    /// Turns per-cell bounds memoization on or off.
    pub fn set_cache_cell_bounds(&mut self, cache: bool) {
        self.cache_bounds = cache;
        self.reset_bounds();
    }

    pub fn cache_cell_bounds(&self) -> bool {
        self.cache_bounds
    }

    /// Modification stamp. Changes on every edit.
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Result<&Point3<f64>> {
        self.points.get(index).ok_or(LocatorError::OutOfRange {
            index,
            count: self.points.len(),
        })
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Result<&Cell> {
        self.cells.get(index).ok_or(LocatorError::OutOfRange {
            index,
            count: self.cells.len(),
        })
    }

    pub fn cell_points(&self, index: usize) -> Result<&[usize]> {
        Ok(self.cell(index)?.point_ids())
    }

    pub fn cell_kind(&self, index: usize) -> Result<CellKind> {
        Ok(self.cell(index)?.kind())
    }

    /// Bounding box of a cell, memoized on first use when caching is on.
    pub fn cell_bounds(&self, index: usize) -> Result<Aabb> {
        let cell = self.cell(index)?;
        if !self.cache_bounds {
            return Ok(cell.bounds(&self.points));
        }
        Ok(*self.bounds[index].get_or_init(|| cell.bounds(&self.points)))
    }

    /// Union of all cell bounds; empty for a store without cells.
    pub fn bounds(&self) -> Aabb {
        self.cells
            .iter()
            .map(|c| c.bounds(&self.points))
            .fold(Aabb::empty(), |acc, b| acc.union(&b))
    }

    fn modified(&mut self) {
        self.mtime = next_stamp();
    }

    fn reset_bounds(&mut self) {
        self.bounds = (0..self.cells.len()).map(|_| OnceLock::new()).collect();
    }
}
