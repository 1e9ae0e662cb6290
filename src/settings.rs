use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::tree::{BuildOptions, Partition};


/// Runtime configuration for the sphere probe.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// Radius of the sphere the rays start from.
    pub outer_radius: f64,
    /// Radius of the indexed sphere the rays are aimed at.
    pub inner_radius: f64,
    pub theta_resolution: usize,
    pub phi_resolution: usize,
    /// Length of each ray, along the inward normal.
    pub ray_length: f64,
    /// Intersection tolerance in world units.
    pub tolerance: f64,
    pub cache_cell_bounds: bool,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
    /// Number of hits the probe should report. Checked when present.
    pub expected_hits: Option<usize>,
    #[serde(default)]
    pub tree: BuildOptions,
}

fn default_show_progress() -> bool {
    true
}

pub fn load_default_config() -> Result<Settings> {
    let root_dir = retrieve_project_root()?;
    let default_config_file = root_dir.join("config/default.toml");

    let config = read_config(&default_config_file, false)?;
    validate_config(&config)?;

    Ok(config)
}

pub fn load_config() -> Result<Settings> {
    let root_dir = retrieve_project_root()?;

    let default_config_file = root_dir.join("config/default.toml");
    let local_config = root_dir.join("config/local.toml");

    let config_file = if local_config.exists() {
        log::info!("using local configuration: {:?}", local_config);
        local_config
    } else {
        log::info!("using default configuration: {:?}", default_config_file);
        default_config_file
    };

    let mut config = read_config(&config_file, true)?;

    let args = CliArgs::parse();
    apply_args(&mut config, &args);

    validate_config(&config)?;
    log::debug!("{:#?}", config);

    Ok(config)
}

fn read_config(path: &Path, with_env: bool) -> Result<Settings> {
    let mut builder = Config::builder().add_source(File::from(path).required(true));
    if with_env {
        builder = builder.add_source(
            Environment::with_prefix("CELLTREE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
    }
    let settings = builder
        .build()
        .with_context(|| format!("failed to load configuration from {:?}", path))?;

    settings
        .try_deserialize()
        .with_context(|| format!("failed to deserialize configuration from {:?}", path))
}

/// Overrides configured values with those given on the command line.
pub fn apply_args(config: &mut Settings, args: &CliArgs) {
    if let Some(outer) = args.outer {
        config.outer_radius = outer;
    }
    if let Some(inner) = args.inner {
        config.inner_radius = inner;
    }
    if let Some(resolution) = args.resolution {
        if resolution != config.theta_resolution || resolution != config.phi_resolution {
            config.expected_hits = None;
        }
        config.theta_resolution = resolution;
        config.phi_resolution = resolution;
    }
    if let Some(length) = args.ray_length {
        config.ray_length = length;
    }
    if let Some(tol) = args.tol {
        config.tolerance = tol;
    }
    if args.no_cache {
        config.cache_cell_bounds = false;
    }
    if args.quiet {
        config.show_progress = false;
    }
    if let Some(expected) = args.expect {
        config.expected_hits = Some(expected);
    }
    if let Some(b) = args.branching {
        config.tree.branching_factor = b;
    }
    if let Some(level) = args.max_level {
        config.tree.max_level = level;
    }
    if let Some(leaf) = args.leaf_size {
        config.tree.cells_per_leaf = leaf;
    }
    if let Some(partition) = args.partition {
        config.tree.partition = partition;
    }
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the CELLTREE_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("CELLTREE_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("failed to get current executable path")?;
    let mut current_dir = exe_path.parent();
    while let Some(dir) = current_dir {
        if dir.join("config").is_dir() {
            return Ok(dir.to_path_buf());
        }
        current_dir = dir.parent();
    }
    bail!("could not find project root directory containing a config/ subdirectory")
}

pub fn validate_config(config: &Settings) -> Result<()> {
    ensure!(config.outer_radius > 0.0, "outer radius must be greater than 0");
    ensure!(config.inner_radius > 0.0, "inner radius must be greater than 0");
    ensure!(
        config.inner_radius < config.outer_radius,
        "inner radius ({}) must be smaller than outer radius ({})",
        config.inner_radius,
        config.outer_radius
    );
    ensure!(config.ray_length > 0.0, "ray length must be greater than 0");
    ensure!(
        config.tolerance >= 0.0 && config.tolerance.is_finite(),
        "tolerance must be a finite non-negative number"
    );
    if config.theta_resolution < 3 || config.phi_resolution < 3 {
        log::warn!("sphere resolutions below 3 are raised to 3");
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about = "celltree - probe a cell tree locator with rays between concentric spheres")]
pub struct CliArgs {
    /// Radius of the outer sphere. Rays start at its points.
    #[arg(long)]
    outer: Option<f64>,

    /// Radius of the inner sphere. This is the mesh the tree is built over.
    #[arg(long)]
    inner: Option<f64>,

    /// Theta and phi resolution of both spheres.
    #[arg(short, long)]
    resolution: Option<usize>,

    /// Length of each ray, measured along the inward normal of its start point.
    #[arg(short = 'l', long)]
    ray_length: Option<f64>,

    /// Intersection tolerance in units of the geometry.
    #[arg(short, long)]
    tol: Option<f64>,

    /// Compute cell bounds on every use instead of caching them.
    #[arg(long)]
    no_cache: bool,

    /// Hide the progress bar.
    #[arg(short, long)]
    quiet: bool,

    /// Expected number of hits. The run fails if a different number is found.
    #[arg(long)]
    expect: Option<usize>,

    /// Number of slabs each tree node is cut into.
    #[arg(short, long)]
    branching: Option<usize>,

    /// Maximum number of tree levels. 0 means no limit.
    #[arg(long)]
    max_level: Option<usize>,

    /// Nodes with at most this many cells become leaves.
    #[arg(long)]
    leaf_size: Option<usize>,

    /// How cells crossing a slab boundary are assigned: "straddle" or "centroid".
    #[arg(long, value_parser = parse_partition)]
    partition: Option<Partition>,
}

fn parse_partition(s: &str) -> Result<Partition, String> {
    match s.to_ascii_lowercase().as_str() {
        "straddle" => Ok(Partition::Straddle),
        "centroid" => Ok(Partition::Centroid),
        _ => Err(format!(
            "Invalid partition: '{}'. Expected 'straddle' or 'centroid'",
            s
        )),
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings:
  - Outer Radius: {:.6}
  - Inner Radius: {:.6}
  - Resolution: {} x {}
  - Ray Length: {:.7}
  - Tolerance: {:.6}
  - Cache Cell Bounds: {}
  - Tree: {}
  ",
            self.outer_radius,
            self.inner_radius,
            self.theta_resolution,
            self.phi_resolution,
            self.ray_length,
            self.tolerance,
            self.cache_cell_bounds,
            self.tree,
        )
    }
}
