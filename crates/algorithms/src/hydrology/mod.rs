//! Hydrological analysis algorithms
//!
//! Algorithms working on D8 flow direction rasters:
//! - Grid resolution: bring flow direction and outlets onto one grid
//! - Watershed: basin labeling from outlet cells
//! - Flow length: upstream and downstream flow path lengths
//! - Longest flow path: per-watershed trunk extraction and vectorization

mod grid;
mod longest_flow_path;
mod path;
mod routing;
mod vectorize;
mod watershed;
pub(crate) mod flow_length;

pub use flow_length::{
    downstream_flow_length, flow_length, sum_flow_lengths, upstream_flow_length, FlowLength,
    FlowLengthDirection, FlowLengthParams,
};
pub use grid::{resolve_grid, ExtentPolicy, PlacedOutlet, ResolvedGrid};
pub use longest_flow_path::{
    mask_flow_direction, watershed_mask, ExtractionReport, LongestFlowPath, LongestFlowPathExtractor,
    LongestFlowPathParams, OutletError, OutletOutcome, Stage,
};
pub use path::{longest_path_mask, PathMask, PathStrategy};
pub use vectorize::{D8PathVectorizer, RasterVectorizer};
pub use watershed::{watershed, D8WatershedLabeler, Seed, WatershedLabeler, WatershedParams, WATERSHED_NODATA};
