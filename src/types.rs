use chrono::NaiveDateTime;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;

/// Reflectance stack (band x row x column), materialised as float for arithmetic
pub type BandArray = Array3<f32>;

/// Pixel invalidity mask (row x column); `true` means invalidate in every product
pub type QualityMask = Array2<bool>;

/// Processing level of a source tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessingLevel {
    /// Orthorectified radiance (thermal bands)
    Ortho,
    /// Surface reflectance
    Nbar,
    /// Pixel quality
    Pqa,
    /// Elevation
    Dem,
}

impl ProcessingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingLevel::Ortho => "ORTHO",
            ProcessingLevel::Nbar => "NBAR",
            ProcessingLevel::Pqa => "PQA",
            ProcessingLevel::Dem => "DEM",
        }
    }
}

impl std::fmt::Display for ProcessingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingLevel {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ORTHO" => Ok(ProcessingLevel::Ortho),
            "NBAR" => Ok(ProcessingLevel::Nbar),
            "PQA" => Ok(ProcessingLevel::Pqa),
            "DEM" => Ok(ProcessingLevel::Dem),
            _ => Err(IndexError::UnknownLevel(s.to_string())),
        }
    }
}

/// One source raster slice, as enumerated by the tiling layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDescriptor {
    pub x_index: i32,
    pub y_index: i32,
    pub start_datetime: NaiveDateTime,
    pub end_datetime: NaiveDateTime,
    pub satellite_tag: String,   // LS5, LS7, LS8
    pub sensor_name: String,     // TM, ETM+, OLI
    pub level_name: String,
    pub band_name: String,
    pub band_tag: String,
    pub tile_layer: u32,
    pub nodata_value: Option<f64>,
    /// WRS-2 path
    pub path: Option<i32>,
    pub start_row: Option<i32>,
    pub end_row: Option<i32>,
    pub tile_pathname: PathBuf,
}

/// Source tiles sharing one spatial/temporal footprint, keyed by processing level
pub type InputTileSet = HashMap<ProcessingLevel, TileDescriptor>;

/// Output side of one temporal stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackContext {
    pub x_index: i32,
    pub y_index: i32,
    pub stack_output_dir: PathBuf,
    pub start_datetime: Option<NaiveDateTime>,
    pub end_datetime: Option<NaiveDateTime>,
    /// Optional satellite filter, e.g. "LS7"
    pub satellite: Option<String>,
    /// Optional sensor filter, e.g. "ETM+"
    pub sensor: Option<String>,
}

impl StackContext {
    pub fn new(x_index: i32, y_index: i32, stack_output_dir: impl Into<PathBuf>) -> Self {
        Self {
            x_index,
            y_index,
            stack_output_dir: stack_output_dir.into(),
            start_datetime: None,
            end_datetime: None,
            satellite: None,
            sensor: None,
        }
    }

    /// Whether a source tile passes the satellite/sensor filter of this stack
    pub fn accepts(&self, tile: &TileDescriptor) -> bool {
        let satellite_ok = self
            .satellite
            .as_ref()
            .map_or(true, |s| s.eq_ignore_ascii_case(&tile.satellite_tag));
        let sensor_ok = self
            .sensor
            .as_ref()
            .map_or(true, |s| s.eq_ignore_ascii_case(&tile.sensor_name));
        satellite_ok && sensor_ok
    }
}

/// Tile type: output raster format and grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileTypeInfo {
    pub tile_type_id: u32,
    pub tile_type_name: String,
    pub crs: String,
    /// GDAL driver short name
    pub file_format: String,
    /// Comma-separated KEY=VALUE creation options
    pub format_options: String,
    pub file_extension: String,
    pub x_pixel_size: f64,
    pub y_pixel_size: f64,
    pub unit: String,
}

impl Default for TileTypeInfo {
    fn default() -> Self {
        Self {
            tile_type_id: 1,
            tile_type_name: "Unprojected WGS84 1-degree at 4000 pixels/degree".to_string(),
            crs: "EPSG:4326".to_string(),
            file_format: "GTiff".to_string(),
            format_options: "COMPRESS=LZW,BIGTIFF=YES".to_string(),
            file_extension: ".tif".to_string(),
            x_pixel_size: 0.00025,
            y_pixel_size: 0.00025,
            unit: "degree".to_string(),
        }
    }
}

/// Metadata of one derived tile: the source descriptor with output fields overwritten
pub type OutputDatasetRecord = TileDescriptor;

/// Derived tiles of one derivation call, keyed by intended stack filename
pub type OutputManifest = BTreeMap<PathBuf, OutputDatasetRecord>;

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Grid of a source raster, copied onto every derived raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterGeometry {
    pub width: usize,
    pub height: usize,
    pub geo_transform: Option<GeoTransform>,
    /// WKT, empty when the source carries none
    pub projection: String,
}

/// Error types for index derivation
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Unknown product identifier: {0}")]
    UnknownProduct(String),

    #[error("Unknown processing level: {0}")]
    UnknownLevel(String),

    #[error("Invalid format options: {0}")]
    InvalidFormat(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

/// Result type for index derivation
pub type IndexResult<T> = Result<T, IndexError>;
