//! Raster data structures and operations

pub mod d8;
mod element;
mod geotransform;
mod grid;

pub use d8::D8Encoding;
pub use element::{RasterElement, SampleFormat};
pub use geotransform::{GeoTransform, StepLengths};
pub use grid::{Raster, RasterStatistics, Window};
