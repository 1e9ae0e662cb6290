//! Procedural meshes: a triangulated sphere and a structured hexahedral grid.
//!
//! - [`SphereSource`] tessellates a sphere on a latitude/longitude lattice.
//!   The two poles come first, followed by one ring of points per meridian,
//!   north to south. Outward unit normals are returned per point.
//! - [`HexGrid`] fills a box with axis-aligned hexahedra on a regular lattice.

use itertools::Itertools;
use nalgebra::{Point3, Vector3};
use std::f64::consts::PI;

use crate::cell::Cell;
use crate::error::Result;
use crate::store::CellStore;


/// Latitude/longitude triangulated sphere.
#[derive(Debug, Clone, PartialEq)]
pub struct SphereSource {
    pub centre: Point3<f64>,
    pub radius: f64,
    /// Number of meridians. At least 3.
    pub theta_resolution: usize,
    /// Number of points on a meridian, poles included. At least 3.
    pub phi_resolution: usize,
}

impl SphereSource {
    /// Sphere about the origin with the same resolution in both directions.
    pub fn new(radius: f64, resolution: usize) -> Self {
        Self {
            centre: Point3::origin(),
            radius,
            theta_resolution: resolution,
            phi_resolution: resolution,
        }
    }

    /// Builds the mesh. Returns the store together with the outward unit
    /// normal of every point, in point order.
    pub fn generate(&self) -> Result<(CellStore, Vec<Vector3<f64>>)> {
        let n_theta = self.theta_resolution.max(3);
        let n_phi = self.phi_resolution.max(3);
        let band = n_phi - 2;
        let ring_points = band * n_theta;

        let mut points = Vec::with_capacity(ring_points + 2);
        let mut normals = Vec::with_capacity(ring_points + 2);
        for n in [Vector3::z(), -Vector3::z()] {
            points.push(self.centre + n * self.radius);
            normals.push(n);
        }

        let d_theta = 2.0 * PI / n_theta as f64;
        let d_phi = PI / (n_phi - 1) as f64;
        for (i, j) in (0..n_theta).cartesian_product(1..n_phi - 1) {
            let theta = i as f64 * d_theta;
            let phi = j as f64 * d_phi;
            let n = Vector3::new(phi.sin() * theta.cos(), phi.sin() * theta.sin(), phi.cos());
            points.push(self.centre + n * self.radius);
            normals.push(n);
        }

        let mut cells = Vec::with_capacity(2 * ring_points);
        // first and last point of meridian i's ring
        let top = |i: usize| (band * i) % ring_points + 2;
        let bottom = |i: usize| (band * i) % ring_points + band + 1;
        for i in 0..n_theta {
            cells.push(Cell::Triangle([top(i), top(i + 1), 0]));
            cells.push(Cell::Triangle([bottom(i), 1, bottom(i + 1)]));
        }
        for (i, j) in (0..n_theta).cartesian_product(0..band - 1) {
            let p0 = band * i + j + 2;
            let p1 = p0 + 1;
            let p2 = (band * (i + 1) + j) % ring_points + 3;
            cells.push(Cell::Triangle([p0, p1, p2]));
            cells.push(Cell::Triangle([p0, p2, p2 - 1]));
        }

        let store = CellStore::from_parts(points, cells)?;
        log::debug!(
            "generated sphere of radius {} with {} points and {} triangles",
            self.radius,
            store.point_count(),
            store.cell_count()
        );
        Ok((store, normals))
    }
}

/// Regular lattice of axis-aligned hexahedra.
#[derive(Debug, Clone, PartialEq)]
pub struct HexGrid {
    /// Number of lattice points along each axis.
    pub dimensions: [usize; 3],
    pub origin: Point3<f64>,
    pub spacing: Vector3<f64>,
}

impl HexGrid {
    /// `n` points per axis, unit spacing, starting at the origin.
    pub fn cube(n: usize) -> Self {
        Self {
            dimensions: [n; 3],
            origin: Point3::origin(),
            spacing: Vector3::repeat(1.0),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.dimensions
            .iter()
            .map(|&d| d.saturating_sub(1))
            .product()
    }

    pub fn generate(&self) -> Result<CellStore> {
        let [nx, ny, nz] = self.dimensions;
        let points = (0..nz)
            .cartesian_product(0..ny)
            .cartesian_product(0..nx)
            .map(|((k, j), i)| {
                self.origin
                    + Vector3::new(
                        i as f64 * self.spacing.x,
                        j as f64 * self.spacing.y,
                        k as f64 * self.spacing.z,
                    )
            })
            .collect();

        let id = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);
        let cells = (0..nz.saturating_sub(1))
            .cartesian_product(0..ny.saturating_sub(1))
            .cartesian_product(0..nx.saturating_sub(1))
            .map(|((k, j), i)| {
                Cell::Hexahedron([
                    id(i, j, k),
                    id(i + 1, j, k),
                    id(i + 1, j + 1, k),
                    id(i, j + 1, k),
                    id(i, j, k + 1),
                    id(i + 1, j, k + 1),
                    id(i + 1, j + 1, k + 1),
                    id(i, j + 1, k + 1),
                ])
            })
            .collect();

        CellStore::from_parts(points, cells)
    }
}
