//! Error types for building and querying a cell tree.

use thiserror::Error;

/// Errors raised by the cell store, the tree builder and query sessions.
///
/// A query that finds nothing is not an error: ray and point queries return
/// `None` (or an empty collection) in that case.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocatorError {
    /// The store holds no cells, so there is nothing to build a tree over.
    #[error("no cells to build the tree with")]
    EmptyDataset,

    /// A cell index outside `0..count` was requested.
    #[error("cell index {index} is out of range for a store of {count} cells")]
    OutOfRange {
        /// Requested cell index.
        index: usize,
        /// Number of cells in the store.
        count: usize,
    },

    /// The store was modified after the tree was built.
    #[error("cell tree is stale: built at stamp {built}, store is now at stamp {current}")]
    StaleIndex {
        /// Modification stamp recorded when the tree was built.
        built: u64,
        /// Current modification stamp of the store.
        current: u64,
    },

    /// The tree has not been built, or its last build failed.
    #[error("cell tree has not been built")]
    NotBuilt,

    /// A cell references a point that does not exist.
    #[error("cell {cell} references point {point}, but the store only has {count} points")]
    InvalidPointIndex {
        /// Index the offending cell would have had.
        cell: usize,
        /// Offending point index.
        point: usize,
        /// Number of points in the store.
        count: usize,
    },

    /// A cell's connectivity is malformed for its kind.
    #[error("invalid cell: {reason}")]
    InvalidCell {
        /// Description of the problem.
        reason: String,
    },
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, LocatorError>;
