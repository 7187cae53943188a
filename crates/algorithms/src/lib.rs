//! # flowpath algorithms
//!
//! Hydrology algorithms for flowpath.
//!
//! ## Modules
//!
//! - **hydrology**: grid resolution, watershed labeling, flow length,
//!   longest flow path extraction
//! - **catalog**: artifact naming, persistence and display sinks

pub mod catalog;
pub mod hydrology;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::catalog::{
        Artifact, ArtifactNames, Catalog, DirectoryCatalog, DisplaySink, LayerManifest, MemoryCatalog,
    };
    pub use crate::hydrology::{
        downstream_flow_length, upstream_flow_length, watershed, ExtentPolicy, ExtractionReport,
        LongestFlowPathExtractor, LongestFlowPathParams, OutletOutcome, PathStrategy,
    };
    pub use flowpath_core::prelude::*;
    pub use flowpath_parallel::{CancellationToken, ProcessingMode};
}
