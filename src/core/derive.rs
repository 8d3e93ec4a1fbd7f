use crate::core::formula::Product;
use crate::core::lock::LockBackend;
use crate::core::writer::{TileSource, TileWriter, WriteJob, WriteOutcome};
use crate::io::quality::QualityMasker;
use crate::io::raster::RasterIo;
use crate::types::{
    IndexError, IndexResult, InputTileSet, OutputDatasetRecord, OutputManifest, ProcessingLevel,
    StackContext, TileDescriptor, TileTypeInfo,
};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Derivation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationParams {
    /// Rewrite outputs even when a readable file already exists
    pub refresh: bool,
    /// Pause after finding an output locked by another worker
    pub contention_backoff: Duration,
}

impl Default for DerivationParams {
    fn default() -> Self {
        Self {
            refresh: false,
            contention_backoff: Duration::from_secs(5),
        }
    }
}

/// Manifest of one derivation call plus what happened to each product
#[derive(Debug, Clone)]
pub struct DerivationReport {
    pub manifest: OutputManifest,
    pub outcomes: BTreeMap<Product, WriteOutcome>,
}

impl DerivationReport {
    pub fn count(&self, outcome: WriteOutcome) -> usize {
        self.outcomes.values().filter(|&&o| o == outcome).count()
    }
}

/// Derives every index product for one input tile
pub struct IndexDeriver<'a> {
    raster: &'a dyn RasterIo,
    masker: &'a dyn QualityMasker,
    locks: &'a dyn LockBackend,
    params: DerivationParams,
}

impl<'a> IndexDeriver<'a> {
    pub fn new(
        raster: &'a dyn RasterIo,
        masker: &'a dyn QualityMasker,
        locks: &'a dyn LockBackend,
        params: DerivationParams,
    ) -> Self {
        Self {
            raster,
            masker,
            locks,
            params,
        }
    }

    pub fn params(&self) -> &DerivationParams {
        &self.params
    }

    /// Derive all products for one tile and return the output manifest.
    ///
    /// Every product gets a manifest entry whether it was written now, already
    /// existed, or was locked by another worker. Callers re-run derivation on a
    /// later pass to fill outputs skipped under contention.
    pub fn derive(
        &self,
        input: &InputTileSet,
        stack: &StackContext,
        tile_type: &TileTypeInfo,
    ) -> IndexResult<OutputManifest> {
        Ok(self.derive_with_report(input, stack, tile_type)?.manifest)
    }

    pub fn derive_with_report(
        &self,
        input: &InputTileSet,
        stack: &StackContext,
        tile_type: &TileTypeInfo,
    ) -> IndexResult<DerivationReport> {
        let reflectance = required_level(input, ProcessingLevel::Nbar)?;
        let quality = required_level(input, ProcessingLevel::Pqa)?;

        if !stack.accepts(reflectance) {
            return Err(IndexError::Precondition(format!(
                "Tile {} ({} {}) is outside the stack filter",
                reflectance.tile_pathname.display(),
                reflectance.satellite_tag,
                reflectance.sensor_name
            )));
        }

        log::debug!("Input tile set: {:#?}", input);

        let mut source = TileSource::new(
            self.raster,
            self.masker,
            &reflectance.tile_pathname,
            &quality.tile_pathname,
        );
        let writer = TileWriter::new(self.raster, self.locks, self.params.refresh);

        let mut manifest = OutputManifest::new();
        let mut outcomes = BTreeMap::new();

        for product in Product::ALL {
            let stack_path = stack_path(stack, product);
            let tile_path = output_tile_path(stack, tile_type, reflectance, product)?;
            let record = output_record(reflectance, product, tile_path);

            let job = WriteJob {
                product,
                output_path: &record.tile_pathname,
                tile_type,
            };
            let outcome = writer.write(&job, &mut source)?;

            if outcome == WriteOutcome::SkippedLocked && !self.params.contention_backoff.is_zero() {
                std::thread::sleep(self.params.contention_backoff);
            }

            outcomes.insert(product, outcome);
            manifest.insert(stack_path, record);
        }

        log::debug!("Output manifest: {:#?}", manifest);
        Ok(DerivationReport { manifest, outcomes })
    }
}

fn required_level(input: &InputTileSet, level: ProcessingLevel) -> IndexResult<&TileDescriptor> {
    input
        .get(&level)
        .ok_or_else(|| IndexError::Precondition(format!("Input tile set has no {} tile", level)))
}

/// Temporal stack file a product slice belongs to, e.g. `NDVI_150_-025_20000101_20001231_pqa.vrt`
pub fn stack_path(stack: &StackContext, product: Product) -> PathBuf {
    let mut name = format!("{}_{:+04}_{:+04}", product.tag(), stack.x_index, stack.y_index).replace('+', "");

    if let Some(start) = stack.start_datetime {
        name.push_str(&format!("_{}", start.format("%Y%m%d")));
    }
    if let Some(end) = stack.end_datetime {
        name.push_str(&format!("_{}", end.format("%Y%m%d")));
    }
    name.push_str("_pqa.vrt");

    stack.stack_output_dir.join(name)
}

/// Trailing file extension; word characters are ASCII only
fn extension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\.[0-9A-Za-z_]+$").unwrap())
}

/// Derived tile path: the reflectance file name with the level swapped for the product tag
pub fn output_tile_path(
    stack: &StackContext,
    tile_type: &TileTypeInfo,
    reflectance: &TileDescriptor,
    product: Product,
) -> IndexResult<PathBuf> {
    let basename = reflectance
        .tile_pathname
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IndexError::Precondition(format!(
                "Reflectance tile path {} has no usable file name",
                reflectance.tile_pathname.display()
            ))
        })?;

    let renamed = basename.replace(ProcessingLevel::Nbar.as_str(), product.tag());
    let renamed = extension_pattern().replace(&renamed, NoExpand(&tile_type.file_extension));

    Ok(stack.stack_output_dir.join(&*renamed))
}

/// Source descriptor re-labelled for a derived product
pub fn output_record(reflectance: &TileDescriptor, product: Product, tile_path: PathBuf) -> OutputDatasetRecord {
    let mut record = reflectance.clone();
    record.tile_pathname = tile_path;
    record.band_name = format!("{} with PQA mask applied", product.tag());
    record.band_tag = format!("{}-PQA", product.tag());
    record.tile_layer = 1;
    record.nodata_value = Some(product.spec().nodata);
    record
}
