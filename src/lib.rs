//! indexstack: per-tile spectral index derivation for satellite tile stacks
//!
//! Derives NDVI, EVI, NDSI, NDMI, SLAVI, SATVI and WATER products from a
//! surface-reflectance tile, invalidates pixels flagged by the quality tile,
//! and writes one single-band raster per product. Several worker processes
//! may run over the same output directory: each output is claimed through a
//! lock file before it is written, and existing outputs are never redone
//! unless a refresh is requested.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BandArray, GeoTransform, IndexError, IndexResult, InputTileSet, OutputDatasetRecord,
    OutputManifest, ProcessingLevel, QualityMask, RasterGeometry, StackContext, TileDescriptor,
    TileTypeInfo,
};

pub use crate::core::{
    DerivationParams, DerivationReport, FileLockBackend, IndexDeriver, LockBackend, Product,
    WriteOutcome,
};
pub use io::{GdalRasterIo, PqaBitMasker, QualityMasker, RasterIo};
