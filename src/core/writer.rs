use crate::core::formula::{Product, ProductArray};
use crate::core::lock::{LockBackend, LockGuard};
use crate::core::mask::apply_quality_mask;
use crate::io::quality::QualityMasker;
use crate::io::raster::{RasterIo, SourceRaster, WriteRequest};
use crate::types::{IndexResult, QualityMask, TileTypeInfo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Terminal state of one (tile, product) write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    /// Output created on this call
    Written,
    /// A readable output was already there and refresh was off
    SkippedExisting,
    /// Another worker holds the output; retry on a later pass
    SkippedLocked,
}

/// Source data of one input tile, loaded on first use and shared by all products
pub struct TileSource<'a> {
    raster: &'a dyn RasterIo,
    masker: &'a dyn QualityMasker,
    reflectance_path: PathBuf,
    quality_path: PathBuf,
    source: Option<SourceRaster>,
    mask: Option<QualityMask>,
}

impl<'a> TileSource<'a> {
    pub fn new(
        raster: &'a dyn RasterIo,
        masker: &'a dyn QualityMasker,
        reflectance_path: &Path,
        quality_path: &Path,
    ) -> Self {
        Self {
            raster,
            masker,
            reflectance_path: reflectance_path.to_path_buf(),
            quality_path: quality_path.to_path_buf(),
            source: None,
            mask: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some() && self.mask.is_some()
    }

    /// Reflectance stack and quality mask, reading them if not done yet
    pub fn materialize(&mut self) -> IndexResult<(&SourceRaster, &QualityMask)> {
        let source = match self.source.take() {
            Some(source) => source,
            None => self.raster.read_stack(&self.reflectance_path)?,
        };
        let source: &SourceRaster = self.source.insert(source);

        let mask = match self.mask.take() {
            Some(mask) => mask,
            None => self.masker.quality_mask(&self.quality_path)?,
        };
        let mask: &QualityMask = self.mask.insert(mask);

        Ok((source, mask))
    }
}

/// One product of one tile
#[derive(Debug, Clone, Copy)]
pub struct WriteJob<'j> {
    pub product: Product,
    pub output_path: &'j Path,
    pub tile_type: &'j TileTypeInfo,
}

/// Runs the check / lock / compute / mask / write / unlock sequence for one output
pub struct TileWriter<'a> {
    raster: &'a dyn RasterIo,
    locks: &'a dyn LockBackend,
    refresh: bool,
}

impl<'a> TileWriter<'a> {
    pub fn new(raster: &'a dyn RasterIo, locks: &'a dyn LockBackend, refresh: bool) -> Self {
        Self {
            raster,
            locks,
            refresh,
        }
    }

    pub fn write(&self, job: &WriteJob<'_>, source: &mut TileSource<'_>) -> IndexResult<WriteOutcome> {
        let output_path = job.output_path;

        if !self.refresh && self.raster.is_readable(output_path) {
            log::info!("Skipped existing dataset {}", output_path.display());
            return Ok(WriteOutcome::SkippedExisting);
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let guard = match LockGuard::try_lock(self.locks, output_path)? {
            Some(guard) => guard,
            None => {
                log::info!("Skipped locked dataset {}", output_path.display());
                return Ok(WriteOutcome::SkippedLocked);
            }
        };

        // Another worker may have finished this output between the check and the claim
        if !self.refresh && self.raster.is_readable(output_path) {
            guard.release()?;
            log::info!("Skipped existing dataset {}", output_path.display());
            return Ok(WriteOutcome::SkippedExisting);
        }

        // An error here drops the guard, which releases the lock
        self.produce(job, source)?;

        guard.release()?;
        log::info!("Finished writing dataset {}", output_path.display());
        Ok(WriteOutcome::Written)
    }

    fn produce(&self, job: &WriteJob<'_>, source: &mut TileSource<'_>) -> IndexResult<()> {
        let (source, mask) = source.materialize()?;
        let spec = job.product.spec();

        let mut data = job.product.compute(&source.bands)?;
        apply_quality_mask(&mut data, mask, spec.nodata as f32)?;
        let array = ProductArray::from_computed(spec.data_type, data);

        let request = WriteRequest {
            format: &job.tile_type.file_format,
            format_options: &job.tile_type.format_options,
            geometry: &source.geometry,
            data: &array,
            nodata: spec.nodata,
            metadata: &source.metadata,
        };

        if let Err(e) = self.raster.write_product(job.output_path, &request) {
            Self::remove_partial(job.output_path);
            return Err(e);
        }
        Ok(())
    }

    fn remove_partial(path: &Path) {
        if !path.exists() {
            return;
        }
        match std::fs::remove_file(path) {
            Ok(()) => log::warn!("Removed partially written dataset {}", path.display()),
            Err(e) => log::warn!("Failed to remove partial dataset {}: {}", path.display(), e),
        }
    }
}
