//! End-to-end tests of longest flow path extraction on synthetic grids.
//!
//! Flow directions use ESRI codes: 1=E, 2=SE, 4=S, 8=SW, 16=W, 32=NW,
//! 64=N, 128=NE. All grids have unit cells with the top-left corner at
//! (0, rows), so cell (row, col) has its center at (col + 0.5, rows - row - 0.5).

use approx::assert_relative_eq;
use flowpath_algorithms::catalog::{
    Artifact, ArtifactNames, Catalog, DirectoryCatalog, LayerManifest, MemoryCatalog,
};
use flowpath_algorithms::hydrology::{
    ExtentPolicy, LongestFlowPathExtractor, LongestFlowPathParams, OutletOutcome, PathStrategy, Stage,
};
use flowpath_core::io::read_geotiff;
use flowpath_core::raster::d8::{self, FLOW_DIR_NODATA};
use flowpath_core::{
    D8Encoding, Error, FeatureCollection, GeoTransform, Outlet, Raster, RasterElement, Result, CRS,
};
use flowpath_parallel::ProcessingMode;

fn flow_dir(data: Vec<u8>, rows: usize, cols: usize) -> Raster<u8> {
    let mut r = Raster::from_vec(data, rows, cols).unwrap();
    r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
    r
}

/// Outlet at the center of cell (row, col) of a grid with `rows` rows
fn outlet_at(id: i64, row: usize, col: usize, rows: usize) -> Outlet {
    Outlet::new(id, col as f64 + 0.5, rows as f64 - row as f64 - 0.5)
}

fn sequential() -> LongestFlowPathParams {
    LongestFlowPathParams {
        mode: ProcessingMode::Sequential,
        ..Default::default()
    }
}

/// Memory catalog whose raster writes fail for names ending in `broken`
struct FailingCatalog {
    inner: MemoryCatalog,
    broken: &'static str,
}

impl Catalog for FailingCatalog {
    fn put_raster<T: RasterElement>(&self, name: &str, raster: &Raster<T>) -> Result<Artifact> {
        if name.ends_with(self.broken) {
            return Err(Error::Io(std::io::Error::other("no space left on device")));
        }
        self.inner.put_raster(name, raster)
    }

    fn put_vector(&self, name: &str, features: &FeatureCollection) -> Result<Artifact> {
        self.inner.put_vector(name, features)
    }
}

/// 20x20 grid draining to the bottom center cell (19, 10) through
/// diagonal side slopes and a straight main channel.
fn converging_basin() -> Raster<u8> {
    let n = 20;
    let mut data = Vec::with_capacity(n * n);
    for row in 0..n {
        for col in 0..n {
            let code = match (row == n - 1, col.cmp(&10)) {
                (_, std::cmp::Ordering::Equal) => 4,
                (false, std::cmp::Ordering::Less) => 2,
                (false, std::cmp::Ordering::Greater) => 8,
                (true, std::cmp::Ordering::Less) => 1,
                (true, std::cmp::Ordering::Greater) => 16,
            };
            data.push(code);
        }
    }
    flow_dir(data, n, n)
}

/// Longest source-to-outlet distance by walking down from every cell
fn brute_force_max_length(fdir: &Raster<u8>) -> f64 {
    let steps = fdir.transform().step_lengths();
    let (rows, cols) = fdir.shape();
    let mut best = 0.0_f64;
    for row in 0..rows {
        for col in 0..cols {
            let (mut r, mut c, mut length) = (row, col, 0.0);
            while let Some(dir) = D8Encoding::Esri.decode(fdir.get(r, c).unwrap()) {
                let Some((nr, nc)) = d8::neighbor(r, c, dir, rows, cols) else {
                    break;
                };
                let (dr, dc) = d8::OFFSETS[dir];
                length += steps.for_offset(dr, dc);
                r = nr;
                c = nc;
            }
            best = best.max(length);
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Straight trunk
// ---------------------------------------------------------------------------

#[test]
fn straight_trunk_due_south() {
    let fdir = flow_dir(vec![4; 25], 5, 5);
    let catalog = MemoryCatalog::new();
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", "t_"))
        .with_params(sequential())
        .extract(&fdir, &[outlet_at(1, 4, 0, 5)])
        .unwrap();

    let up: Raster<f64> = catalog.read_raster("mem/t_wshed_uplen_1.tif").unwrap();
    let down: Raster<f64> = catalog.read_raster("mem/t_wshed_dnlen_1.tif").unwrap();
    let total: Raster<f64> = catalog.read_raster("mem/t_wshed_updnlen_1.tif").unwrap();
    let mask: Raster<u8> = catalog.read_raster("mem/t_wshed_lfp_1.tif").unwrap();

    // The watershed is the first column only
    assert_eq!(up.shape(), (5, 1));
    assert_relative_eq!(up.get(0, 0).unwrap(), 0.0);
    assert_relative_eq!(down.get(0, 0).unwrap(), 4.0);
    assert_relative_eq!(down.get(4, 0).unwrap(), 0.0);
    for row in 0..5 {
        assert_relative_eq!(total.get(row, 0).unwrap(), 4.0);
        assert_eq!(mask.get(row, 0).unwrap(), 1);
    }

    let path = report.completed().next().unwrap();
    assert_relative_eq!(path.length, 4.0);
    assert_eq!(path.cells, 5);
    assert_eq!(path.geometry.0.len(), 1);
    let ys: Vec<f64> = path.geometry.0[0].coords().map(|c| c.y).collect();
    assert_eq!(ys, vec![4.5, 3.5, 2.5, 1.5, 0.5]);
    assert!(path.geometry.0[0].coords().all(|c| c.x == 0.5));
}

// ---------------------------------------------------------------------------
// Several outlets
// ---------------------------------------------------------------------------

#[test]
fn disjoint_watersheds_partition_cells() {
    let fdir = flow_dir(vec![4; 25], 5, 5);
    let catalog = MemoryCatalog::new();
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &[outlet_at(1, 4, 0, 5), outlet_at(2, 4, 3, 5)])
        .unwrap();
    assert_eq!(report.completed().count(), 2);

    let labels: Raster<i64> = catalog.read_raster("mem/wsheds.tif").unwrap();
    for row in 0..5 {
        for col in 0..5 {
            let expected = match col {
                0 => 1,
                3 => 2,
                _ => -1,
            };
            assert_eq!(labels.get(row, col).unwrap(), expected);
        }
    }

    // Each watershed mask sits on its own column
    let a: Raster<u8> = catalog.read_raster("mem/wshed_1.tif").unwrap();
    let b: Raster<u8> = catalog.read_raster("mem/wshed_2.tif").unwrap();
    let (a_bounds, b_bounds) = (a.bounds(), b.bounds());
    assert!(
        a_bounds.2 <= b_bounds.0,
        "watershed 1 {:?} overlaps watershed 2 {:?}",
        a_bounds,
        b_bounds
    );

    let xs: Vec<Vec<f64>> = report
        .completed()
        .map(|p| p.geometry.0[0].coords().map(|c| c.x).collect())
        .collect();
    assert!(xs[0].iter().all(|&x| x == 0.5));
    assert!(xs[1].iter().all(|&x| x == 3.5));
}

#[test]
fn one_vector_artifact_per_outlet() {
    let fdir = flow_dir(vec![4; 25], 5, 5);
    let catalog = MemoryCatalog::new();
    // Outlet 3 shares a cell with outlet 1 and ends up empty
    let outlets = [outlet_at(1, 4, 0, 5), outlet_at(2, 2, 2, 5), outlet_at(3, 4, 0, 5)];
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", "p_"))
        .extract(&fdir, &outlets)
        .unwrap();

    let ids: Vec<i64> = report.outcomes.iter().map(OutletOutcome::outlet).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(report.empty_count(), 1);
    assert!(!report.has_failures());

    let vectors: Vec<String> = catalog
        .locations()
        .into_iter()
        .filter(|l| l.ends_with(".geojson"))
        .collect();
    assert_eq!(
        vectors,
        vec![
            "mem/p_wshed_lfp_1.geojson".to_string(),
            "mem/p_wshed_lfp_2.geojson".to_string(),
            "mem/p_wshed_lfp_3.geojson".to_string(),
        ]
    );
}

// ---------------------------------------------------------------------------
// Degenerate watersheds
// ---------------------------------------------------------------------------

#[test]
fn single_cell_watershed() {
    // Everything flows east, so nothing drains into the west edge
    let fdir = flow_dir(vec![1; 9], 3, 3);
    let catalog = MemoryCatalog::new();
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &[outlet_at(5, 1, 0, 3)])
        .unwrap();

    let path = report.completed().next().unwrap();
    assert_relative_eq!(path.length, 0.0);
    assert_eq!(path.cells, 1);
    assert_eq!(path.geometry.0.len(), 1);
    assert_eq!(path.geometry.0[0].0.len(), 1);

    let up: Raster<f64> = catalog.read_raster("mem/wshed_uplen_5.tif").unwrap();
    let down: Raster<f64> = catalog.read_raster("mem/wshed_dnlen_5.tif").unwrap();
    let mask: Raster<u8> = catalog.read_raster("mem/wshed_lfp_5.tif").unwrap();
    assert_eq!(up.shape(), (1, 1));
    assert_relative_eq!(up.get(0, 0).unwrap(), 0.0);
    assert_relative_eq!(down.get(0, 0).unwrap(), 0.0);
    assert_eq!(mask.get(0, 0).unwrap(), 1);
}

#[test]
fn outlet_on_nodata_is_empty() {
    let mut fdir = flow_dir(vec![4, 4, FLOW_DIR_NODATA, 4], 2, 2);
    fdir.set_nodata(Some(FLOW_DIR_NODATA));
    fdir.set_crs(Some(CRS::from_epsg(32719)));
    let catalog = MemoryCatalog::new();
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &[outlet_at(1, 1, 0, 2)])
        .unwrap();

    match &report.outcomes[0] {
        OutletOutcome::Empty { outlet, reason, .. } => {
            assert_eq!(*outlet, 1);
            assert!(reason.is_empty_watershed());
        }
        other => panic!("expected empty outcome, got {:?}", other),
    }
    // The empty layer keeps the reference system of the input
    let bytes = catalog.get("mem/wshed_lfp_1.geojson").unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::32719");
    assert_eq!(json["features"][0]["properties"]["cells"], 0);
}

#[test]
fn failed_write_leaves_other_outlets_intact() {
    let fdir = flow_dir(vec![4; 25], 5, 5);
    let catalog = FailingCatalog {
        inner: MemoryCatalog::new(),
        broken: "wshed_uplen_2",
    };
    let outlets = [outlet_at(1, 4, 0, 5), outlet_at(2, 4, 1, 5), outlet_at(3, 4, 2, 5)];
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &outlets)
        .unwrap();

    assert!(report.has_failures());
    match &report.outcomes[1] {
        OutletOutcome::Failed(err) => {
            assert_eq!(err.outlet, 2);
            assert_eq!(err.stage, Stage::Persist);
            assert_eq!(err.artifact.as_deref(), Some("mem/wshed_uplen_2"));
            let msg = err.to_string();
            assert!(msg.contains("outlet 2"), "{msg}");
            assert!(msg.contains("wshed_uplen_2"), "{msg}");
            assert!(msg.contains("no space left"), "{msg}");
        }
        other => panic!("expected failed outcome, got {:?}", other),
    }
    for i in [0, 2] {
        assert!(matches!(report.outcomes[i], OutletOutcome::Completed(_)));
    }

    let stored = catalog.inner.locations();
    for id in [1, 3] {
        for name in [
            format!("mem/wshed_uplen_{}.tif", id),
            format!("mem/wshed_lfp_{}.tif", id),
            format!("mem/wshed_lfp_{}.geojson", id),
        ] {
            assert!(stored.contains(&name), "missing {name}");
        }
    }
    // Outputs written before the failure stay, nothing after it is written
    assert!(stored.contains(&"mem/wshed_fdir_2.tif".to_string()));
    assert!(!stored.iter().any(|l| l.starts_with("mem/wshed_dnlen_2") || l.starts_with("mem/wshed_lfp_2")));
}

#[test]
fn large_outlet_ids_are_stored_exactly() {
    let fdir = flow_dir(vec![4; 25], 5, 5);
    let catalog = MemoryCatalog::new();
    let outlets = [outlet_at(16_777_217, 4, 0, 5), outlet_at(16_777_216, 4, 1, 5)];
    LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &outlets)
        .unwrap();

    let labels: Raster<i64> = catalog.read_raster("mem/wsheds.tif").unwrap();
    for row in 0..5 {
        assert_eq!(labels.get(row, 0).unwrap(), 16_777_217);
        assert_eq!(labels.get(row, 1).unwrap(), 16_777_216);
    }
    assert!(catalog.get("mem/wshed_lfp_16777217.geojson").is_some());
}

#[test]
fn distant_outlet_aborts_union_run() {
    let fdir = flow_dir(vec![4; 25], 5, 5);
    let catalog = MemoryCatalog::new();
    let outlets = [Outlet::new(1, 0.5, 0.5), Outlet::new(2, 1e300, 0.5)];
    let err = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &outlets)
        .unwrap_err();
    assert!(matches!(err, Error::Precondition(_)), "{err}");
    assert!(catalog.locations().is_empty());
}

// ---------------------------------------------------------------------------
// Flow length properties
// ---------------------------------------------------------------------------

#[test]
fn nodata_propagates_to_total_length() {
    // SE  .  / .  S / .  S  with every other cell no-data; the watershed
    // window is 3x2 and half of it lies outside the watershed.
    let n = FLOW_DIR_NODATA;
    let mut fdir = flow_dir(vec![2, n, n, 4, n, 4], 3, 2);
    fdir.set_nodata(Some(n));

    let catalog = MemoryCatalog::new();
    LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &[outlet_at(1, 2, 1, 3)])
        .unwrap();

    let up: Raster<f64> = catalog.read_raster("mem/wshed_uplen_1.tif").unwrap();
    let down: Raster<f64> = catalog.read_raster("mem/wshed_dnlen_1.tif").unwrap();
    let total: Raster<f64> = catalog.read_raster("mem/wshed_updnlen_1.tif").unwrap();
    assert_eq!(total.shape(), (3, 2));

    for row in 0..3 {
        for col in 0..2 {
            let either_missing = up.get(row, col).unwrap().is_nan() || down.get(row, col).unwrap().is_nan();
            assert_eq!(total.get(row, col).unwrap().is_nan(), either_missing, "cell ({}, {})", row, col);
        }
    }
    assert!(total.get(1, 0).unwrap().is_nan());
    assert_relative_eq!(
        total.get(0, 0).unwrap(),
        1.0 + std::f64::consts::SQRT_2,
        epsilon = 1e-6
    );
}

#[test]
fn maximum_is_exact_and_order_independent() {
    let fdir = converging_basin();
    let expected = brute_force_max_length(&fdir);
    let outlets = [outlet_at(1, 19, 10, 20)];

    for strategy in [PathStrategy::Traced, PathStrategy::Threshold] {
        for mode in [ProcessingMode::Sequential, ProcessingMode::ParallelWith(4)] {
            let catalog = MemoryCatalog::new();
            let params = LongestFlowPathParams {
                strategy,
                mode,
                write_intermediates: false,
                ..Default::default()
            };
            let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
                .with_params(params)
                .extract(&fdir, &outlets)
                .unwrap();
            let path = report.completed().next().unwrap();
            assert_relative_eq!(path.length, expected, epsilon = 1e-9);
        }
    }
}

#[test]
fn traced_path_is_connected() {
    let fdir = converging_basin();
    let catalog = MemoryCatalog::new();
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &[outlet_at(1, 19, 10, 20)])
        .unwrap();
    let path = report.completed().next().unwrap();

    // One chain whose consecutive vertices are D8 neighbors, ending at the outlet
    assert_eq!(path.geometry.0.len(), 1);
    let coords: Vec<_> = path.geometry.0[0].coords().copied().collect();
    assert_eq!(coords.len(), path.cells);
    for pair in coords.windows(2) {
        let dx = (pair[1].x - pair[0].x).abs();
        let dy = (pair[1].y - pair[0].y).abs();
        assert!(dx <= 1.0 + 1e-9 && dy <= 1.0 + 1e-9 && dx + dy > 0.0);
    }
    let last = coords[coords.len() - 1];
    assert_eq!((last.x, last.y), (10.5, 0.5));
}

// ---------------------------------------------------------------------------
// Grid resolution
// ---------------------------------------------------------------------------

#[test]
fn union_extent_covers_outlet_beyond_raster() {
    let fdir = flow_dir(vec![4; 9], 3, 3);
    let catalog = MemoryCatalog::new();
    // Outlet 2 is two cells below the raster
    let outlets = [outlet_at(1, 2, 1, 3), Outlet::new(2, 1.5, -1.5)];
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &outlets)
        .unwrap();

    let labels: Raster<i64> = catalog.read_raster("mem/wsheds.tif").unwrap();
    assert_eq!(labels.shape(), (5, 3));
    assert!(matches!(report.outcomes[0], OutletOutcome::Completed(_)));
    // The padded cell under outlet 2 is no-data
    assert!(matches!(report.outcomes[1], OutletOutcome::Empty { outlet: 2, .. }));
}

#[test]
fn rotated_grid_aborts_the_run() {
    let mut fdir = flow_dir(vec![4; 4], 2, 2);
    let mut gt = *fdir.transform();
    gt.col_rotation = 0.1;
    fdir.set_transform(gt);

    let catalog = MemoryCatalog::new();
    let result = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .extract(&fdir, &[outlet_at(1, 1, 0, 2)]);
    assert!(result.is_err());
    assert!(catalog.locations().is_empty());
}

#[test]
fn intersection_extent_crops_watersheds() {
    let fdir = flow_dir(vec![4; 25], 5, 5);
    let catalog = MemoryCatalog::new();
    let params = LongestFlowPathParams {
        extent_policy: ExtentPolicy::Intersection,
        ..sequential()
    };
    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", ""))
        .with_params(params)
        .extract(&fdir, &[outlet_at(1, 2, 1, 5), outlet_at(2, 3, 2, 5)])
        .unwrap();

    let labels: Raster<i64> = catalog.read_raster("mem/wsheds.tif").unwrap();
    assert_eq!(labels.shape(), (2, 2));
    let lengths: Vec<f64> = report.completed().map(|p| p.length).collect();
    assert_eq!(lengths, vec![0.0, 1.0]);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn memory_runs_are_bit_identical() {
    let fdir = converging_basin();
    let outlets = [outlet_at(1, 19, 10, 20), outlet_at(2, 10, 3, 20)];

    let run = |mode| {
        let catalog = MemoryCatalog::new();
        LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("mem", "run_"))
            .with_params(LongestFlowPathParams {
                mode,
                ..Default::default()
            })
            .extract(&fdir, &outlets)
            .unwrap();
        catalog.snapshot()
    };

    let first = run(ProcessingMode::Parallel);
    let second = run(ProcessingMode::Sequential);
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn directory_runs_are_bit_identical() {
    let fdir = converging_basin();
    let outlets = [outlet_at(1, 19, 10, 20)];
    let dirs = [tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap()];

    for dir in &dirs {
        let location = dir.path().to_string_lossy().into_owned();
        LongestFlowPathExtractor::new(&DirectoryCatalog::new(), ArtifactNames::new(&location, "lfp_"))
            .extract(&fdir, &outlets)
            .unwrap();
    }

    let names = [
        "lfp_wsheds.tif",
        "lfp_wshed_1.tif",
        "lfp_wshed_fdir_1.tif",
        "lfp_wshed_uplen_1.tif",
        "lfp_wshed_dnlen_1.tif",
        "lfp_wshed_updnlen_1.tif",
        "lfp_wshed_lfp_1.tif",
        "lfp_wshed_lfp_1.geojson",
    ];
    for name in names {
        let a = std::fs::read(dirs[0].path().join(name)).unwrap();
        let b = std::fs::read(dirs[1].path().join(name)).unwrap();
        assert_eq!(a, b, "{} differs between runs", name);
    }
}

#[test]
fn directory_output_with_manifest() {
    let dir = tempfile::tempdir().unwrap();
    // Trailing separators are trimmed from the location
    let location = format!("{}//", dir.path().display());
    let manifest = LayerManifest::new();
    let catalog = DirectoryCatalog::new();

    let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new(&location, "x_"))
        .with_display(&manifest)
        .extract(&flow_dir(vec![4; 25], 5, 5), &[outlet_at(4, 4, 2, 5)])
        .unwrap();
    assert_eq!(report.completed().count(), 1);

    let lfp = dir.path().join("x_wshed_lfp_4.geojson");
    assert!(lfp.exists());
    let mask: Raster<u8> = read_geotiff(dir.path().join("x_wshed_lfp_4.tif"), None).unwrap();
    assert_eq!(mask.shape(), (5, 1));
    assert_relative_eq!(mask.transform().origin_x, 2.0);

    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&lfp).unwrap()).unwrap();
    assert_eq!(json["features"][0]["id"], 4);
    assert_eq!(json["features"][0]["geometry"]["type"], "MultiLineString");

    let layers = manifest.layers();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].outlet, 4);
    assert!(layers[0].location.ends_with("x_wshed_lfp_4.geojson"));
}
