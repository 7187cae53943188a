//! GeoJSON reading (outlet points) and writing (feature collections)

use crate::error::{Error, Result};
use crate::vector::{FeatureCollection, Outlet};
use geojson::{GeoJson, Value};
use std::fs;
use std::path::Path;

/// Write a feature collection as pretty-printed GeoJSON
pub fn write_features<P: AsRef<Path>>(features: &FeatureCollection, path: P) -> Result<()> {
    let bytes = write_features_to_buffer(features)?;
    fs::write(path.as_ref(), bytes)?;
    Ok(())
}

/// Encode a feature collection as GeoJSON bytes
pub fn write_features_to_buffer(features: &FeatureCollection) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(&features.to_geojson())?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Read outlet points from a GeoJSON file
pub fn read_outlets<P: AsRef<Path>>(path: P) -> Result<Vec<Outlet>> {
    let text = fs::read_to_string(path.as_ref())?;
    parse_outlets(&text)
}

/// Parse outlet points from GeoJSON text.
///
/// Accepts a FeatureCollection or a single Feature of Point geometries.
/// The outlet id is taken from the feature id, else from a numeric `id`
/// property, else from the 1-based position of the feature.
pub fn parse_outlets(text: &str) -> Result<Vec<Outlet>> {
    let geojson: GeoJson = text.parse()?;

    let features = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => {
            return Err(Error::Serialization(
                "outlets must be GeoJSON features carrying an id".to_string(),
            ));
        }
    };

    features
        .iter()
        .enumerate()
        .map(|(position, feature)| {
            let geometry = feature.geometry.as_ref().ok_or_else(|| {
                Error::Serialization(format!("outlet feature {} has no geometry", position + 1))
            })?;

            let (x, y) = match &geometry.value {
                Value::Point(coords) if coords.len() >= 2 => (coords[0], coords[1]),
                other => {
                    return Err(Error::Serialization(format!(
                        "outlet feature {} must be a Point, got {}",
                        position + 1,
                        geometry_kind(other)
                    )));
                }
            };

            Ok(Outlet::new(feature_id(feature).unwrap_or(position as i64 + 1), x, y))
        })
        .collect()
}

fn geometry_kind(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "an empty Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn feature_id(feature: &geojson::Feature) -> Option<i64> {
    use geojson::feature::Id;

    match &feature.id {
        Some(Id::Number(n)) => n.as_i64(),
        Some(Id::String(s)) => s.trim().parse().ok(),
        None => feature.property("id").and_then(serde_json::Value::as_i64),
    }
}
