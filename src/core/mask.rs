use crate::types::{IndexError, IndexResult};
use ndarray::{Array2, Zip};
use num_traits::Zero;

/// Overwrite every masked pixel with `sentinel`, in place.
///
/// A zero sentinel is never applied: masked pixels then keep their computed
/// value. NaN is not zero, so NaN sentinels do mask.
///
/// Returns the number of pixels overwritten.
pub fn apply_quality_mask<T>(
    data: &mut Array2<T>,
    mask: &Array2<bool>,
    sentinel: T,
) -> IndexResult<usize>
where
    T: Copy + Zero + Send + Sync,
{
    if data.dim() != mask.dim() {
        return Err(IndexError::ShapeMismatch {
            expected: data.dim(),
            found: mask.dim(),
        });
    }

    if sentinel.is_zero() {
        log::debug!("Sentinel is zero, quality mask not applied");
        return Ok(0);
    }

    #[cfg(feature = "parallel")]
    Zip::from(data.view_mut()).and(mask).par_for_each(|value, &invalid| {
        if invalid {
            *value = sentinel;
        }
    });
    #[cfg(not(feature = "parallel"))]
    Zip::from(data.view_mut()).and(mask).for_each(|value, &invalid| {
        if invalid {
            *value = sentinel;
        }
    });

    let masked_count = mask.iter().filter(|&&invalid| invalid).count();
    log::debug!("Applied quality mask to {} pixels", masked_count);
    Ok(masked_count)
}
