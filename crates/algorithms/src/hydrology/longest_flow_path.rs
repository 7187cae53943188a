//! Longest flow path per watershed
//!
//! For every outlet the extractor isolates its watershed, measures upstream
//! and downstream flow length inside it, selects the cells whose total
//! length is maximal and turns them into a polyline. Outlets are processed
//! independently and may run in parallel; the shared flow direction and
//! watershed rasters are only read.
//!
//! # Example
//!
//! ```ignore
//! use flowpath_algorithms::catalog::{ArtifactNames, DirectoryCatalog};
//! use flowpath_algorithms::hydrology::LongestFlowPathExtractor;
//!
//! let catalog = DirectoryCatalog::new();
//! let report = LongestFlowPathExtractor::new(&catalog, ArtifactNames::new("out", "run_"))
//!     .extract(&flow_dir, &outlets)?;
//! ```

use crate::catalog::{Artifact, ArtifactNames, Catalog, DisplaySink};
use crate::hydrology::flow_length::{downstream_flow_length, sum_flow_lengths, upstream_flow_length};
use crate::hydrology::grid::{resolve_grid, ExtentPolicy, PlacedOutlet};
use crate::hydrology::path::{longest_path_mask, PathStrategy};
use crate::hydrology::vectorize::{D8PathVectorizer, RasterVectorizer};
use crate::hydrology::watershed::{D8WatershedLabeler, Seed, WatershedLabeler};
use flowpath_core::raster::d8::FLOW_DIR_NODATA;
use flowpath_core::vector::AttributeValue;
use flowpath_core::{
    D8Encoding, Error, Feature, FeatureCollection, Outlet, Raster, RasterElement, Result, Window, CRS,
};
use flowpath_parallel::{CancellationToken, ParallelStrategy, ProcessingMode};
use geo_types::{Geometry, MultiLineString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Parameters for longest flow path extraction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongestFlowPathParams {
    pub strategy: PathStrategy,
    pub extent_policy: ExtentPolicy,
    pub encoding: D8Encoding,
    pub mode: ProcessingMode,
    /// Persist the per-outlet watershed, flow direction and flow length
    /// rasters. The path mask and polyline are always written.
    pub write_intermediates: bool,
}

impl Default for LongestFlowPathParams {
    fn default() -> Self {
        Self {
            strategy: PathStrategy::default(),
            extent_policy: ExtentPolicy::default(),
            encoding: D8Encoding::default(),
            mode: ProcessingMode::default(),
            write_intermediates: true,
        }
    }
}

/// Processing stage of one outlet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Label,
    ExtractWatershed,
    MaskFlowDirection,
    UpstreamLength,
    DownstreamLength,
    TotalLength,
    PathMask,
    Vectorize,
    Persist,
}

impl Stage {
    /// Step number, 1 to 9
    pub fn step(self) -> usize {
        self as usize + 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Label => "watershed labeling",
            Stage::ExtractWatershed => "watershed extraction",
            Stage::MaskFlowDirection => "flow direction masking",
            Stage::UpstreamLength => "upstream flow length",
            Stage::DownstreamLength => "downstream flow length",
            Stage::TotalLength => "total flow length",
            Stage::PathMask => "path mask",
            Stage::Vectorize => "vectorization",
            Stage::Persist => "persistence",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.step(), self.name())
    }
}

/// Failure of one outlet, tagged with where it happened
#[derive(Debug, thiserror::Error)]
#[error("outlet {outlet}: {stage} failed{}: {source}", artifact_note(.artifact))]
pub struct OutletError {
    pub outlet: i64,
    pub stage: Stage,
    /// Name of the artifact being written, for persistence failures
    pub artifact: Option<String>,
    #[source]
    pub source: Error,
}

fn artifact_note(artifact: &Option<String>) -> String {
    artifact
        .as_ref()
        .map(|name| format!(" writing {}", name))
        .unwrap_or_default()
}

/// Longest flow path of one outlet
#[derive(Debug, Clone)]
pub struct LongestFlowPath {
    pub outlet: i64,
    pub geometry: MultiLineString<f64>,
    /// Maximum total flow length in map units
    pub length: f64,
    /// Number of cells in the path mask
    pub cells: usize,
    /// Everything written for this outlet, in write order
    pub artifacts: Vec<Artifact>,
}

/// What happened to one outlet
#[derive(Debug)]
pub enum OutletOutcome {
    Completed(LongestFlowPath),
    /// Nothing to extract; an empty polyline layer is still written
    Empty {
        outlet: i64,
        reason: Error,
        artifacts: Vec<Artifact>,
    },
    Failed(OutletError),
    /// Not started because the run was cancelled
    Cancelled { outlet: i64 },
}

impl OutletOutcome {
    pub fn outlet(&self) -> i64 {
        match self {
            OutletOutcome::Completed(path) => path.outlet,
            OutletOutcome::Empty { outlet, .. } | OutletOutcome::Cancelled { outlet } => *outlet,
            OutletOutcome::Failed(err) => err.outlet,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, OutletOutcome::Failed(_))
    }
}

/// Result of one extraction run
#[derive(Debug)]
pub struct ExtractionReport {
    /// Combined watershed raster
    pub watersheds: Artifact,
    /// One outcome per input outlet, in input order
    pub outcomes: Vec<OutletOutcome>,
}

impl ExtractionReport {
    pub fn completed(&self) -> impl Iterator<Item = &LongestFlowPath> {
        self.outcomes.iter().filter_map(|o| match o {
            OutletOutcome::Completed(path) => Some(path),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &OutletError> {
        self.outcomes.iter().filter_map(|o| match o {
            OutletOutcome::Failed(err) => Some(err),
            _ => None,
        })
    }

    pub fn empty_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, OutletOutcome::Empty { .. }))
            .count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, OutletOutcome::Cancelled { .. }))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(OutletOutcome::is_failed)
    }
}

/// Runs longest flow path extraction for a set of outlets
pub struct LongestFlowPathExtractor<'a, C, L = D8WatershedLabeler, V = D8PathVectorizer> {
    catalog: &'a C,
    names: ArtifactNames,
    labeler: L,
    vectorizer: V,
    display: Option<&'a dyn DisplaySink>,
    cancel: CancellationToken,
    params: LongestFlowPathParams,
}

impl<'a, C: Catalog> LongestFlowPathExtractor<'a, C> {
    pub fn new(catalog: &'a C, names: ArtifactNames) -> Self {
        Self {
            catalog,
            names,
            labeler: D8WatershedLabeler,
            vectorizer: D8PathVectorizer,
            display: None,
            cancel: CancellationToken::new(),
            params: LongestFlowPathParams::default(),
        }
    }
}

impl<'a, C, L, V> LongestFlowPathExtractor<'a, C, L, V>
where
    C: Catalog,
    L: WatershedLabeler,
    V: RasterVectorizer,
{
    pub fn with_params(mut self, params: LongestFlowPathParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_display(mut self, display: &'a dyn DisplaySink) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use another watershed labeler
    pub fn with_labeler<L2: WatershedLabeler>(self, labeler: L2) -> LongestFlowPathExtractor<'a, C, L2, V> {
        LongestFlowPathExtractor {
            catalog: self.catalog,
            names: self.names,
            labeler,
            vectorizer: self.vectorizer,
            display: self.display,
            cancel: self.cancel,
            params: self.params,
        }
    }

    /// Use another mask vectorizer
    pub fn with_vectorizer<V2: RasterVectorizer>(self, vectorizer: V2) -> LongestFlowPathExtractor<'a, C, L, V2> {
        LongestFlowPathExtractor {
            catalog: self.catalog,
            names: self.names,
            labeler: self.labeler,
            vectorizer,
            display: self.display,
            cancel: self.cancel,
            params: self.params,
        }
    }

    pub fn params(&self) -> &LongestFlowPathParams {
        &self.params
    }

    /// Extract the longest flow path of every outlet.
    ///
    /// # Errors
    /// Returns `Err` only for failures that affect the whole run: grid
    /// resolution, watershed labeling and writing the combined watershed
    /// raster. Per-outlet problems are reported in the returned
    /// [`ExtractionReport`].
    pub fn extract(&self, flow_dir: &Raster<u8>, outlets: &[Outlet]) -> Result<ExtractionReport> {
        self.extract_with_progress(flow_dir, outlets, |_| {})
    }

    /// Like [`extract`](Self::extract), calling `on_outlet` as each outlet
    /// finishes (from worker threads when running in parallel).
    pub fn extract_with_progress<F>(
        &self,
        flow_dir: &Raster<u8>,
        outlets: &[Outlet],
        on_outlet: F,
    ) -> Result<ExtractionReport>
    where
        F: Fn(&OutletOutcome) + Sync + Send,
    {
        let start = Instant::now();
        let grid = resolve_grid(flow_dir, outlets, self.params.extent_policy)?;
        info!(
            rows = grid.flow_dir.rows(),
            cols = grid.flow_dir.cols(),
            outlets = outlets.len(),
            placed = grid.placed_count(),
            policy = ?self.params.extent_policy,
            "resolved common grid"
        );

        let seeds: Vec<Seed> = grid
            .outlets
            .iter()
            .filter_map(|p| p.cell.map(|(row, col)| Seed::new(p.outlet.id, row, col)))
            .collect();
        let watersheds = self
            .labeler
            .label(&grid.flow_dir, self.params.encoding, &seeds)?;
        let watersheds_artifact = self
            .catalog
            .put_raster(&self.names.watersheds(), &watersheds)?;
        debug!(location = %watersheds_artifact.location, "wrote combined watersheds");

        let windows = watershed_windows(&watersheds);

        let outcomes = self
            .params
            .mode
            .map_items(&grid.outlets, |_, placed| {
                let outcome = if self.cancel.is_cancelled() {
                    OutletOutcome::Cancelled {
                        outlet: placed.outlet.id,
                    }
                } else {
                    self.process_outlet(placed, &grid.flow_dir, &watersheds, &windows)
                };
                on_outlet(&outcome);
                outcome
            })
            .map_err(|e| Error::Other(format!("cannot build thread pool: {}", e)))?;

        let report = ExtractionReport {
            watersheds: watersheds_artifact,
            outcomes,
        };
        info!(
            completed = report.completed().count(),
            empty = report.empty_count(),
            failed = report.failures().count(),
            cancelled = report.cancelled_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "longest flow path extraction finished"
        );
        Ok(report)
    }

    fn process_outlet(
        &self,
        placed: &PlacedOutlet,
        flow_dir: &Raster<u8>,
        watersheds: &Raster<i64>,
        windows: &HashMap<i64, Window>,
    ) -> OutletOutcome {
        let id = placed.outlet.id;
        let Some(&window) = windows.get(&id) else {
            return self.empty(id, Error::EmptyWatershed { outlet: id }, flow_dir.crs(), Vec::new());
        };

        let mut artifacts = Vec::new();
        match self.run_stages(id, flow_dir, watersheds, window, &mut artifacts) {
            Ok(Some(path)) => {
                info!(
                    outlet = id,
                    length = path.length,
                    cells = path.cells,
                    "longest flow path extracted"
                );
                OutletOutcome::Completed(path)
            }
            Ok(None) => self.empty(id, Error::AllNodata { outlet: id }, flow_dir.crs(), artifacts),
            Err(err) => {
                warn!(outlet = id, stage = %err.stage, error = %err.source, "outlet failed");
                OutletOutcome::Failed(err)
            }
        }
    }

    /// Stages 2 to 9 for one watershed. `Ok(None)` when the total flow
    /// length has no valid cell.
    fn run_stages(
        &self,
        id: i64,
        flow_dir: &Raster<u8>,
        watersheds: &Raster<i64>,
        window: Window,
        artifacts: &mut Vec<Artifact>,
    ) -> std::result::Result<Option<LongestFlowPath>, OutletError> {
        let fail = |stage: Stage| {
            move |source: Error| OutletError {
                outlet: id,
                stage,
                artifact: None,
                source,
            }
        };
        let encoding = self.params.encoding;
        let intermediates = self.params.write_intermediates;

        let watershed = watershed_mask(watersheds, id, window).map_err(fail(Stage::ExtractWatershed))?;
        debug!(outlet = id, rows = window.rows, cols = window.cols, "extracted watershed");
        if intermediates {
            artifacts.push(self.persist_raster(id, &self.names.watershed(id), &watershed)?);
        }

        let fdir = mask_flow_direction(flow_dir, &watershed, window).map_err(fail(Stage::MaskFlowDirection))?;
        if intermediates {
            artifacts.push(self.persist_raster(id, &self.names.flow_direction(id), &fdir)?);
        }

        let upstream = upstream_flow_length(&fdir, encoding).map_err(fail(Stage::UpstreamLength))?;
        if intermediates {
            artifacts.push(self.persist_raster(id, &self.names.upstream_length(id), &upstream)?);
        }

        let downstream = downstream_flow_length(&fdir, encoding).map_err(fail(Stage::DownstreamLength))?;
        if intermediates {
            artifacts.push(self.persist_raster(id, &self.names.downstream_length(id), &downstream)?);
        }

        let total = sum_flow_lengths(&upstream, &downstream).map_err(fail(Stage::TotalLength))?;
        if intermediates {
            artifacts.push(self.persist_raster(id, &self.names.total_length(id), &total)?);
        }
        debug!(outlet = id, "computed flow lengths");

        let Some(path) = longest_path_mask(&fdir, encoding, &upstream, &total, self.params.strategy)
            .map_err(fail(Stage::PathMask))?
        else {
            return Ok(None);
        };
        let name = self.names.longest_flow_path(id);
        artifacts.push(self.persist_raster(id, &name, &path.mask)?);

        let geometry = self
            .vectorizer
            .vectorize(&path.mask, &fdir, encoding)
            .map_err(fail(Stage::Vectorize))?;

        let mut feature = Feature::new(Geometry::MultiLineString(geometry.clone())).with_id(id);
        feature.set_property("outlet_id", AttributeValue::Int(id));
        feature.set_property("length", AttributeValue::Float(path.max_length));
        feature.set_property("cells", AttributeValue::Int(path.cells.len() as i64));
        feature.set_property("strategy", AttributeValue::String(self.params.strategy.to_string()));

        let vector = self.persist_vector(id, &name, feature, fdir.crs().cloned())?;
        if let Some(display) = self.display {
            display.add_layer(id, &vector).map_err(fail(Stage::Persist))?;
        }
        artifacts.push(vector);

        Ok(Some(LongestFlowPath {
            outlet: id,
            geometry,
            length: path.max_length,
            cells: path.cells.len(),
            artifacts: std::mem::take(artifacts),
        }))
    }

    /// Write the empty polyline layer of an outlet with nothing to extract
    fn empty(&self, id: i64, reason: Error, crs: Option<&CRS>, mut artifacts: Vec<Artifact>) -> OutletOutcome {
        warn!(outlet = id, reason = %reason, "no flow path to extract");

        let mut feature = Feature::new(Geometry::MultiLineString(MultiLineString::new(Vec::new()))).with_id(id);
        feature.set_property("outlet_id", AttributeValue::Int(id));
        feature.set_property("cells", AttributeValue::Int(0));

        match self.persist_vector(id, &self.names.longest_flow_path(id), feature, crs.cloned()) {
            Ok(artifact) => {
                artifacts.push(artifact);
                OutletOutcome::Empty {
                    outlet: id,
                    reason,
                    artifacts,
                }
            }
            Err(err) => OutletOutcome::Failed(err),
        }
    }

    fn persist_raster<T: RasterElement>(
        &self,
        id: i64,
        name: &str,
        raster: &Raster<T>,
    ) -> std::result::Result<Artifact, OutletError> {
        self.catalog
            .put_raster(name, raster)
            .map_err(|source| OutletError {
                outlet: id,
                stage: Stage::Persist,
                artifact: Some(name.to_string()),
                source,
            })
    }

    fn persist_vector(
        &self,
        id: i64,
        name: &str,
        feature: Feature,
        crs: Option<CRS>,
    ) -> std::result::Result<Artifact, OutletError> {
        let mut features = FeatureCollection::new();
        features.crs = crs;
        features.push(feature);
        self.catalog
            .put_vector(name, &features)
            .map_err(|source| OutletError {
                outlet: id,
                stage: Stage::Persist,
                artifact: Some(name.to_string()),
                source,
            })
    }
}

/// Bounding window of every label in one pass over the watershed raster
fn watershed_windows(watersheds: &Raster<i64>) -> HashMap<i64, Window> {
    let mut windows: HashMap<i64, Window> = HashMap::new();
    for ((row, col), &label) in watersheds.data().indexed_iter() {
        if watersheds.is_nodata(label) {
            continue;
        }
        windows
            .entry(label)
            .and_modify(|w| w.extend_to(row, col))
            .or_insert_with(|| Window::new(row, col, 1, 1));
    }
    windows
}

/// Binary mask of one watershed (1 inside, 0 elsewhere and no-data),
/// cropped to `window`
pub fn watershed_mask(watersheds: &Raster<i64>, id: i64, window: Window) -> Result<Raster<u8>> {
    let mut mask = watersheds
        .window(window)?
        .map(|label| u8::from(label == Some(id)));
    mask.set_nodata(Some(0));
    if !mask.data().iter().any(|&v| v == 1) {
        return Err(Error::EmptyWatershed { outlet: id });
    }
    Ok(mask)
}

/// Flow direction inside `watershed`, [`FLOW_DIR_NODATA`] elsewhere.
/// `watershed` covers `window` of `flow_dir`.
pub fn mask_flow_direction(flow_dir: &Raster<u8>, watershed: &Raster<u8>, window: Window) -> Result<Raster<u8>> {
    let mut fdir = flow_dir.window(window)?;
    fdir.ensure_same_grid(watershed)?;

    ndarray::Zip::from(fdir.data_mut())
        .and(watershed.data())
        .for_each(|code, &inside| {
            if inside != 1 {
                *code = FLOW_DIR_NODATA;
            }
        });
    fdir.set_nodata(Some(FLOW_DIR_NODATA));
    Ok(fdir)
}
