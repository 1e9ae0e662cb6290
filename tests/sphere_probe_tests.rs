use celltree::{
    error::LocatorError,
    probe::SphereProbe,
    settings,
    source::SphereSource,
    tree::{BuildOptions, CellTree, Partition},
};
use nalgebra::Point3;

const EXPECTED_HITS: usize = 9802;

fn run_with_cache(cache_cell_bounds: bool) {
    let mut settings = settings::load_default_config().unwrap();
    settings.show_progress = false;
    settings.cache_cell_bounds = cache_cell_bounds;

    let report = SphereProbe::new(&settings).unwrap().run().unwrap();

    assert_eq!(report.rays, EXPECTED_HITS);
    assert_eq!(
        report.hits, EXPECTED_HITS,
        "{} ray-sphere intersections missed",
        report.missed.len()
    );
    assert_eq!(report.cache_cell_bounds, cache_cell_bounds);
    assert!(report.check(settings.expected_hits).is_ok());
}

#[test]
fn concentric_spheres_cached_bounds() {
    run_with_cache(true);
}

#[test]
fn concentric_spheres_uncached_bounds() {
    run_with_cache(false);
}

#[test]
fn concentric_spheres_other_tree_shapes() {
    let mut settings = settings::load_default_config().unwrap();
    settings.show_progress = false;
    for tree in [
        BuildOptions {
            partition: Partition::Centroid,
            ..Default::default()
        },
        BuildOptions {
            branching_factor: 7,
            cells_per_leaf: 2,
            ..Default::default()
        },
    ] {
        settings.tree = tree;
        let report = SphereProbe::new(&settings).unwrap().run().unwrap();
        assert_eq!(report.hits, EXPECTED_HITS);
    }
}

#[test]
fn editing_the_sphere_invalidates_the_tree() {
    let (mut store, _) = SphereSource::new(0.8, 100).generate().unwrap();
    let mut tree = CellTree::build(&store, BuildOptions::default()).unwrap();
    assert!(tree.locator(&store).is_ok());

    store.set_point(0, Point3::new(0.0, 0.0, 0.9)).unwrap();
    assert!(matches!(
        tree.locator(&store),
        Err(LocatorError::StaleIndex { .. })
    ));

    tree.rebuild(&store).unwrap();
    let locator = tree.locator(&store).unwrap();
    let hit = locator
        .intersect_segment(Point3::new(0.0, 0.0, 1.0), Point3::origin(), 0.001)
        .unwrap();
    assert!((hit.point.z - 0.9).abs() < 1e-9);
}
