//! Raster and quality-tile input/output

pub mod quality;
pub mod raster;

pub use quality::{PqaBitMasker, QualityMasker, PQA_GOOD_PIXEL};
pub use raster::{parse_format_options, GdalRasterIo, RasterIo, SourceRaster, WriteRequest};
