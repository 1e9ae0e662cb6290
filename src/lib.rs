//! A cell tree locator: a bounding-box hierarchy over the cells of a mesh,
//! answering closest ray intersection, point location and region queries.
//!
//! Build a [`tree::CellTree`] over a [`store::CellStore`], then open a
//! [`query::Locator`] to query it:
//!
//! ```
//! use celltree::source::SphereSource;
//! use celltree::tree::{BuildOptions, CellTree};
//! use nalgebra::Point3;
//!
//! let (store, _) = SphereSource::new(1.0, 16).generate().unwrap();
//! let tree = CellTree::build(&store, BuildOptions::default()).unwrap();
//! let locator = tree.locator(&store).unwrap();
//!
//! let hit = locator
//!     .intersect_segment(Point3::new(0.1, 0.2, 2.0), Point3::new(0.1, 0.2, -2.0), 1e-9)
//!     .unwrap();
//! assert!(hit.t < 0.5);
//! assert!(hit.point.z > 0.9);
//! ```

pub mod bounds;
pub mod cell;
pub mod error;
pub mod geom;
pub mod probe;
pub mod query;
pub mod ray;
pub mod settings;
pub mod source;
pub mod store;
pub mod traversal;
pub mod tree;
