use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use crate::settings::Settings;
use crate::source::SphereSource;
use crate::store::CellStore;
use crate::tree::{CellTree, TreeStats};


/// Casts one ray inward from every point of an outer sphere onto a
/// tree-indexed inner sphere and counts the hits.
///
/// The rays start on the outer sphere and run along the negative point
/// normal for the configured length. Only the inner sphere is indexed.
#[derive(Debug, Clone)]
pub struct SphereProbe {
    pub settings: Settings,
    /// Start point and outward normal of every ray.
    pub sources: Vec<(Point3<f64>, Vector3<f64>)>,
    /// The mesh the rays are cast against.
    pub target: CellStore,
}

impl SphereProbe {
    pub fn new(settings: &Settings) -> Result<Self> {
        let outer = SphereSource {
            centre: Point3::origin(),
            radius: settings.outer_radius,
            theta_resolution: settings.theta_resolution,
            phi_resolution: settings.phi_resolution,
        };
        let inner = SphereSource {
            radius: settings.inner_radius,
            ..outer.clone()
        };

        let (outer_store, normals) = outer.generate()?;
        let sources = outer_store.points().iter().copied().zip(normals).collect();

        let (mut target, _) = inner.generate()?;
        target.set_cache_cell_bounds(settings.cache_cell_bounds);

        Ok(Self {
            settings: settings.clone(),
            sources,
            target,
        })
    }

    /// Builds the tree over the inner sphere and casts every ray in parallel.
    pub fn run(&self) -> Result<ProbeReport> {
        let start = Instant::now();
        let tree = CellTree::build(&self.target, self.settings.tree.clone())?;
        let build_time = start.elapsed();
        log::info!("built cell tree over {} cells in {:.2?}", tree.cell_count(), build_time);

        let locator = tree.locator(&self.target)?;

        let pb = if self.settings.show_progress {
            ProgressBar::new(self.sources.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>5}/{len:5} {msg} ETA: {eta_precise}",
            )?
            .progress_chars("█▇▆▅▄▃▂▁"),
        );
        pb.set_message("rays".to_string());

        let length = self.settings.ray_length;
        let tol = self.settings.tolerance;
        let start = Instant::now();
        let missed: Vec<usize> = self
            .sources
            .par_iter()
            .enumerate()
            .filter_map(|(i, (p, n))| {
                let hit = locator.intersect_segment(*p, p - n * length, tol);
                pb.inc(1);
                hit.is_none().then_some(i)
            })
            .collect();
        let query_time = start.elapsed();
        pb.finish_and_clear();

        let rays = self.sources.len();
        let report = ProbeReport {
            rays,
            hits: rays - missed.len(),
            missed,
            cache_cell_bounds: self.target.cache_cell_bounds(),
            build_time,
            query_time,
            tree_stats: *tree.stats(),
        };
        log::info!("{} of {} rays hit the inner sphere", report.hits, report.rays);
        Ok(report)
    }
}

/// Outcome of a [`SphereProbe`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub rays: usize,
    pub hits: usize,
    /// Indices of the rays that found no cell, in ray order.
    pub missed: Vec<usize>,
    pub cache_cell_bounds: bool,
    pub build_time: Duration,
    pub query_time: Duration,
    pub tree_stats: TreeStats,
}

impl ProbeReport {
    /// Fails when an expected hit count is given and differs from the result.
    pub fn check(&self, expected: Option<usize>) -> Result<()> {
        if let Some(expected) = expected {
            ensure!(
                self.hits == expected,
                "{} ray-sphere intersections missed: found {} of {} expected",
                expected.saturating_sub(self.hits),
                self.hits,
                expected
            );
        }
        Ok(())
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let per_ray = if self.rays == 0 {
            Duration::ZERO
        } else {
            self.query_time / self.rays as u32
        };
        write!(
            f,
            "Probe Report:
  - Rays: {}
  - Hits: {}
  - Missed: {}
  - Cache Cell Bounds: {}
  - Build Time: {:.2?}
  - Query Time: {:.2?} ({:.2?} per ray)
{}",
            self.rays,
            self.hits,
            self.missed.len(),
            self.cache_cell_bounds,
            self.build_time,
            self.query_time,
            per_ray,
            self.tree_stats,
        )
    }
}
