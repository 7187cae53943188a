//! Output naming and persistence of extraction artifacts
//!
//! A [`Catalog`] stores rasters and vector layers under caller-chosen
//! names. A [`DisplaySink`] is told about finished flow path layers.

use flowpath_core::io::{self, GeoTiffOptions};
use flowpath_core::{Error, FeatureCollection, Raster, RasterElement, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Names of every artifact of one extraction run.
///
/// Built from an output location and a file name prefix: trailing `/` and
/// `\` are trimmed from the location and exactly one `/` is appended
/// before the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    base: String,
}

impl ArtifactNames {
    pub fn new(location: &str, prefix: &str) -> Self {
        let trimmed = location.trim_end_matches(['/', '\\']);
        let dir = match (location.is_empty(), trimmed.is_empty()) {
            (true, _) => ".",
            // The location was only separators, i.e. a root
            (false, true) => "",
            (false, false) => trimmed,
        };
        Self {
            base: format!("{}/{}", dir, prefix),
        }
    }

    /// Combined watershed raster
    pub fn watersheds(&self) -> String {
        format!("{}wsheds", self.base)
    }

    /// Watershed mask of one outlet
    pub fn watershed(&self, id: i64) -> String {
        format!("{}wshed_{}", self.base, id)
    }

    /// Flow direction restricted to one watershed
    pub fn flow_direction(&self, id: i64) -> String {
        format!("{}wshed_fdir_{}", self.base, id)
    }

    pub fn upstream_length(&self, id: i64) -> String {
        format!("{}wshed_uplen_{}", self.base, id)
    }

    pub fn downstream_length(&self, id: i64) -> String {
        format!("{}wshed_dnlen_{}", self.base, id)
    }

    pub fn total_length(&self, id: i64) -> String {
        format!("{}wshed_updnlen_{}", self.base, id)
    }

    /// Longest flow path, both the raster mask and the polyline layer
    pub fn longest_flow_path(&self, id: i64) -> String {
        format!("{}wshed_lfp_{}", self.base, id)
    }
}

/// What an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Raster,
    Vector,
}

/// A persisted output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Logical name, see [`ArtifactNames`]
    pub name: String,
    pub kind: ArtifactKind,
    /// Where the catalog put it (file path or key)
    pub location: String,
}

/// Persists rasters and vector layers
pub trait Catalog: Sync {
    fn put_raster<T: RasterElement>(&self, name: &str, raster: &Raster<T>) -> Result<Artifact>;

    fn put_vector(&self, name: &str, features: &FeatureCollection) -> Result<Artifact>;
}

/// Writes `<name>.tif` GeoTIFFs and `<name>.geojson` layers to disk
#[derive(Debug, Clone, Default)]
pub struct DirectoryCatalog {
    options: GeoTiffOptions,
}

impl DirectoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: GeoTiffOptions) -> Self {
        Self { options }
    }

    fn prepare(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Other(format!("cannot create {} for {}: {}", parent.display(), path.display(), e))
            })?;
        }
        Ok(())
    }
}

impl Catalog for DirectoryCatalog {
    fn put_raster<T: RasterElement>(&self, name: &str, raster: &Raster<T>) -> Result<Artifact> {
        let location = format!("{}.tif", name);
        let path = Path::new(&location);
        Self::prepare(path)?;
        io::write_geotiff(raster, path, Some(self.options.clone()))
            .map_err(|e| Error::Other(format!("cannot write {}: {}", location, e)))?;
        Ok(Artifact {
            name: name.to_string(),
            kind: ArtifactKind::Raster,
            location,
        })
    }

    fn put_vector(&self, name: &str, features: &FeatureCollection) -> Result<Artifact> {
        let location = format!("{}.geojson", name);
        let path = Path::new(&location);
        Self::prepare(path)?;
        io::write_features(features, path)
            .map_err(|e| Error::Other(format!("cannot write {}: {}", location, e)))?;
        Ok(Artifact {
            name: name.to_string(),
            kind: ArtifactKind::Vector,
            location,
        })
    }
}

/// Keeps encoded artifacts in memory, keyed like [`DirectoryCatalog`] paths
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, location: String, bytes: Vec<u8>) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::Other(format!("cannot store {}: memory catalog lock poisoned", location)))?
            .insert(location, bytes);
        Ok(())
    }

    /// Encoded bytes stored at `location`
    pub fn get(&self, location: &str) -> Option<Vec<u8>> {
        self.entries.lock().ok()?.get(location).cloned()
    }

    /// Every stored location, sorted
    pub fn locations(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Decode a stored raster
    pub fn read_raster<T: RasterElement>(&self, location: &str) -> Result<Raster<T>> {
        let bytes = self
            .get(location)
            .ok_or_else(|| Error::Other(format!("no artifact at {}", location)))?;
        io::read_geotiff_from_buffer(&bytes, None)
    }

    /// Snapshot of all entries
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Catalog for MemoryCatalog {
    fn put_raster<T: RasterElement>(&self, name: &str, raster: &Raster<T>) -> Result<Artifact> {
        let location = format!("{}.tif", name);
        self.insert(location.clone(), io::write_geotiff_to_buffer(raster, None)?)?;
        Ok(Artifact {
            name: name.to_string(),
            kind: ArtifactKind::Raster,
            location,
        })
    }

    fn put_vector(&self, name: &str, features: &FeatureCollection) -> Result<Artifact> {
        let location = format!("{}.geojson", name);
        self.insert(location.clone(), io::write_features_to_buffer(features)?)?;
        Ok(Artifact {
            name: name.to_string(),
            kind: ArtifactKind::Vector,
            location,
        })
    }
}

/// Receives finished flow path layers, e.g. to show them on a map
pub trait DisplaySink: Send + Sync {
    fn add_layer(&self, outlet: i64, artifact: &Artifact) -> Result<()>;
}

/// One layer registered with a [`LayerManifest`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    pub outlet: i64,
    pub name: String,
    pub kind: ArtifactKind,
    pub location: String,
}

/// Display sink that records layers and saves them as a JSON list
#[derive(Debug, Default)]
pub struct LayerManifest {
    layers: Mutex<Vec<Layer>>,
}

impl LayerManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered layers ordered by outlet id
    pub fn layers(&self) -> Vec<Layer> {
        let mut layers = self.layers.lock().map(|l| l.clone()).unwrap_or_default();
        layers.sort_by_key(|l| l.outlet);
        layers
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.layers())?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

impl DisplaySink for LayerManifest {
    fn add_layer(&self, outlet: i64, artifact: &Artifact) -> Result<()> {
        self.layers
            .lock()
            .map_err(|_| Error::Other("layer manifest lock poisoned".into()))?
            .push(Layer {
                outlet,
                name: artifact.name.clone(),
                kind: artifact.kind,
                location: artifact.location.clone(),
            });
        Ok(())
    }
}
