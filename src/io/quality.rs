use crate::io::raster::GdalRasterIo;
use crate::types::{IndexResult, QualityMask};
use std::path::Path;

/// Produces the invalidity mask for a quality tile
pub trait QualityMasker {
    fn quality_mask(&self, quality_path: &Path) -> IndexResult<QualityMask>;
}

impl<F> QualityMasker for F
where
    F: Fn(&Path) -> IndexResult<QualityMask>,
{
    fn quality_mask(&self, quality_path: &Path) -> IndexResult<QualityMask> {
        self(quality_path)
    }
}

/// All-tests-passed bits of a PQA band (saturation, contiguity, land/sea, cloud and shadow tests)
pub const PQA_GOOD_PIXEL: u16 = 0x3FFF;

/// Flags a pixel invalid unless every bit of `good_pixel_bits` is set in its PQA word
#[derive(Debug, Clone, Copy)]
pub struct PqaBitMasker {
    pub good_pixel_bits: u16,
}

impl Default for PqaBitMasker {
    fn default() -> Self {
        Self {
            good_pixel_bits: PQA_GOOD_PIXEL,
        }
    }
}

impl PqaBitMasker {
    pub fn new(good_pixel_bits: u16) -> Self {
        Self { good_pixel_bits }
    }

    pub fn is_invalid(&self, pqa_word: i32) -> bool {
        let required = i32::from(self.good_pixel_bits);
        pqa_word & required != required
    }
}

impl QualityMasker for PqaBitMasker {
    fn quality_mask(&self, quality_path: &Path) -> IndexResult<QualityMask> {
        log::debug!("Computing quality mask from: {}", quality_path.display());

        let pqa = GdalRasterIo::new().read_band_i32(quality_path)?;
        let mask = pqa.mapv(|word| self.is_invalid(word));

        let invalid = mask.iter().filter(|&&m| m).count();
        log::debug!(
            "Quality mask flags {} of {} pixels ({:.2}%)",
            invalid,
            mask.len(),
            invalid as f64 / mask.len().max(1) as f64 * 100.0
        );
        Ok(mask)
    }
}
