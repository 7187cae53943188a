//! Error types for flowpath

use thiserror::Error;

/// Main error type for flowpath operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// Inputs cannot be brought onto a usable common grid
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// No cell of the watershed raster carries the outlet's identifier
    #[error("Outlet {outlet} has an empty watershed")]
    EmptyWatershed { outlet: i64 },

    /// Every cell of the total flow length raster is no-data
    #[error("Total flow length of outlet {outlet} is entirely no-data")]
    AllNodata { outlet: i64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error means "nothing to extract" rather than a failure
    pub fn is_empty_watershed(&self) -> bool {
        matches!(self, Error::EmptyWatershed { .. } | Error::AllNodata { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<geojson::Error> for Error {
    fn from(e: geojson::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for flowpath operations
pub type Result<T> = std::result::Result<T, Error>;
