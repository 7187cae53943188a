//! I/O operations for reading and writing geospatial data

mod geojson_io;
mod native;

pub use geojson_io::{
    parse_outlets, read_outlets, write_features, write_features_to_buffer,
};
pub use native::{
    read_geotiff, read_geotiff_from_buffer, write_geotiff, write_geotiff_to_buffer,
    GeoTiffOptions,
};
