//! Spectral index formulas and the static product table

use crate::types::{BandArray, IndexError, IndexResult};
use ndarray::{Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Fixed-point scale applied to normalised-difference indices
pub const SCALE_FACTOR: f32 = 10000.0;

// Band positions within the reflectance stack
pub const BLUE: usize = 0;
pub const GREEN: usize = 1;
pub const RED: usize = 2;
pub const NIR: usize = 3;
pub const SWIR1: usize = 4;
pub const SWIR2: usize = 5;

/// Derived product identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Product {
    Ndvi,
    Evi,
    Ndsi,
    Ndmi,
    Slavi,
    Satvi,
    Water,
}

/// Storage data type of a derived raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    Int16,
    Float32,
    Byte,
}

/// One row of the product table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductSpec {
    pub product: Product,
    pub data_type: StorageType,
    pub nodata: f64,
}

/// Product table, one row per identifier, in `Product::ALL` order
pub const PRODUCT_TABLE: [ProductSpec; 7] = [
    ProductSpec { product: Product::Ndvi, data_type: StorageType::Int16, nodata: -32768.0 },
    ProductSpec { product: Product::Evi, data_type: StorageType::Int16, nodata: -32768.0 },
    ProductSpec { product: Product::Ndsi, data_type: StorageType::Int16, nodata: -32768.0 },
    ProductSpec { product: Product::Ndmi, data_type: StorageType::Int16, nodata: -32768.0 },
    ProductSpec { product: Product::Slavi, data_type: StorageType::Float32, nodata: f64::NAN },
    ProductSpec { product: Product::Satvi, data_type: StorageType::Int16, nodata: -32768.0 },
    // -1 does not fit a byte; 255 is its 8-bit two's-complement image
    ProductSpec { product: Product::Water, data_type: StorageType::Byte, nodata: 255.0 },
];

impl Product {
    /// Outputs generated from each reflectance tile, in processing order
    pub const ALL: [Product; 7] = [
        Product::Ndvi,
        Product::Evi,
        Product::Ndsi,
        Product::Ndmi,
        Product::Slavi,
        Product::Satvi,
        Product::Water,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Product::Ndvi => "NDVI",
            Product::Evi => "EVI",
            Product::Ndsi => "NDSI",
            Product::Ndmi => "NDMI",
            Product::Slavi => "SLAVI",
            Product::Satvi => "SATVI",
            Product::Water => "WATER",
        }
    }

    pub fn spec(&self) -> &'static ProductSpec {
        let index = match self {
            Product::Ndvi => 0,
            Product::Evi => 1,
            Product::Ndsi => 2,
            Product::Ndmi => 3,
            Product::Slavi => 4,
            Product::Satvi => 5,
            Product::Water => 6,
        };
        &PRODUCT_TABLE[index]
    }

    /// Number of leading bands the formula reads
    pub fn required_bands(&self) -> usize {
        match self {
            Product::Ndvi | Product::Evi => NIR + 1,
            Product::Ndsi | Product::Ndmi | Product::Slavi => SWIR1 + 1,
            Product::Satvi => SWIR2 + 1,
            // Shape only
            Product::Water => 1,
        }
    }

    /// Evaluate the formula over a reflectance stack.
    ///
    /// Division follows IEEE semantics: a zero denominator yields ±inf or NaN,
    /// which masking or storage conversion deals with later.
    pub fn compute(&self, bands: &BandArray) -> IndexResult<Array2<f32>> {
        let available = bands.len_of(Axis(0));
        if available < self.required_bands() {
            return Err(IndexError::Precondition(format!(
                "{} needs {} bands, reflectance stack has {}",
                self.tag(),
                self.required_bands(),
                available
            )));
        }

        let data = match self {
            Product::Ndvi => zip2(band(bands, NIR), band(bands, RED), |nir, red| {
                (nir - red) / (nir + red) * SCALE_FACTOR
            }),
            Product::Evi => zip3(band(bands, NIR), band(bands, RED), band(bands, BLUE), |nir, red, blue| {
                25000.0 * ((nir - red) / (nir + 60000.0 * red - 75000.0 * blue + 10000.0))
            }),
            Product::Ndsi => zip2(band(bands, RED), band(bands, SWIR1), |red, swir1| {
                (red - swir1) / (red + swir1) * SCALE_FACTOR
            }),
            Product::Ndmi => zip2(band(bands, NIR), band(bands, SWIR1), |nir, swir1| {
                (nir - swir1) / (nir + swir1) * SCALE_FACTOR
            }),
            Product::Slavi => zip3(band(bands, NIR), band(bands, RED), band(bands, SWIR1), |nir, red, swir1| {
                nir / (red + swir1)
            }),
            Product::Satvi => zip3(band(bands, SWIR1), band(bands, RED), band(bands, SWIR2), |swir1, red, swir2| {
                ((swir1 - red) / (swir1 + red + 5000.0)) * 15000.0 - swir2 / 2.0
            }),
            // TODO: plug in the water classifier once it has a Rust port
            Product::Water => Array2::zeros(band(bands, BLUE).raw_dim()),
        };

        Ok(data)
    }
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for Product {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Product::ALL
            .iter()
            .copied()
            .find(|p| p.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| IndexError::UnknownProduct(s.to_string()))
    }
}

fn band(bands: &BandArray, index: usize) -> ArrayView2<'_, f32> {
    bands.index_axis(Axis(0), index)
}

fn zip2<F>(a: ArrayView2<f32>, b: ArrayView2<f32>, f: F) -> Array2<f32>
where
    F: Fn(f32, f32) -> f32 + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        Zip::from(a).and(b).par_map_collect(|&a, &b| f(a, b))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(a).and(b).map_collect(|&a, &b| f(a, b))
    }
}

fn zip3<F>(a: ArrayView2<f32>, b: ArrayView2<f32>, c: ArrayView2<f32>, f: F) -> Array2<f32>
where
    F: Fn(f32, f32, f32) -> f32 + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        Zip::from(a).and(b).and(c).par_map_collect(|&a, &b, &c| f(a, b, c))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(a).and(b).and(c).map_collect(|&a, &b, &c| f(a, b, c))
    }
}

/// Derived array in its storage data type
#[derive(Debug, Clone, PartialEq)]
pub enum ProductArray {
    Int16(Array2<i16>),
    Float32(Array2<f32>),
    Byte(Array2<u8>),
}

impl ProductArray {
    /// Convert computed values to the storage type.
    ///
    /// Integer targets round half away from zero and saturate; NaN becomes 0.
    pub fn from_computed(data_type: StorageType, data: Array2<f32>) -> Self {
        match data_type {
            StorageType::Float32 => ProductArray::Float32(data),
            StorageType::Int16 => ProductArray::Int16(data.mapv(|v| v.round() as i16)),
            StorageType::Byte => ProductArray::Byte(data.mapv(|v| v.round() as u8)),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        match self {
            ProductArray::Int16(a) => a.dim(),
            ProductArray::Float32(a) => a.dim(),
            ProductArray::Byte(a) => a.dim(),
        }
    }

    pub fn data_type(&self) -> StorageType {
        match self {
            ProductArray::Int16(_) => StorageType::Int16,
            ProductArray::Float32(_) => StorageType::Float32,
            ProductArray::Byte(_) => StorageType::Byte,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn uniform_stack(values: [f32; 6]) -> BandArray {
        let mut stack = Array3::<f32>::zeros((6, 3, 3));
        for (b, v) in values.iter().enumerate() {
            stack.index_axis_mut(Axis(0), b).fill(*v);
        }
        stack
    }

    #[test]
    fn test_table_has_one_row_per_product() {
        for (i, product) in Product::ALL.iter().enumerate() {
            assert_eq!(PRODUCT_TABLE[i].product, *product);
            assert_eq!(product.spec().product, *product);
        }
    }

    #[test]
    fn test_ndvi() {
        let stack = uniform_stack([500.0, 800.0, 2000.0, 4000.0, 1500.0, 900.0]);
        let ndvi = Product::Ndvi.compute(&stack).unwrap();
        assert_eq!(ndvi.dim(), (3, 3));
        for v in ndvi.iter() {
            assert_relative_eq!(*v, 3333.3333, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_evi() {
        let stack = uniform_stack([500.0, 800.0, 2000.0, 4000.0, 1500.0, 900.0]);
        let evi = Product::Evi.compute(&stack).unwrap();
        let expected = 25000.0_f32 * (2000.0 / (4000.0 + 60000.0 * 2000.0 - 75000.0 * 500.0 + 10000.0));
        assert_relative_eq!(evi[[1, 1]], expected, max_relative = 1e-5);
    }

    #[test]
    fn test_ndsi_ndmi_satvi() {
        let stack = uniform_stack([500.0, 800.0, 2000.0, 4000.0, 1500.0, 900.0]);

        let ndsi = Product::Ndsi.compute(&stack).unwrap();
        assert_relative_eq!(ndsi[[0, 0]], 500.0 / 3500.0 * 10000.0, max_relative = 1e-5);

        let ndmi = Product::Ndmi.compute(&stack).unwrap();
        assert_relative_eq!(ndmi[[0, 0]], 2500.0 / 5500.0 * 10000.0, max_relative = 1e-5);

        let satvi = Product::Satvi.compute(&stack).unwrap();
        let expected = (-500.0_f32 / 8500.0) * 15000.0 - 450.0;
        assert_relative_eq!(satvi[[2, 2]], expected, max_relative = 1e-5);
    }

    #[test]
    fn test_slavi_zero_denominator_is_nan() {
        let stack = uniform_stack([0.0; 6]);
        let slavi = Product::Slavi.compute(&stack).unwrap();
        assert!(slavi.iter().all(|v| v.is_nan()));

        let stack = uniform_stack([0.0, 0.0, 0.0, 100.0, 0.0, 0.0]);
        let slavi = Product::Slavi.compute(&stack).unwrap();
        assert!(slavi.iter().all(|v| v.is_infinite() && *v > 0.0));
    }

    #[test]
    fn test_water_placeholder_is_zero() {
        let stack = uniform_stack([1.0; 6]);
        let water = Product::Water.compute(&stack).unwrap();
        assert!(water.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_too_few_bands() {
        let stack = Array3::<f32>::zeros((5, 2, 2));
        assert!(Product::Ndmi.compute(&stack).is_ok());
        match Product::Satvi.compute(&stack) {
            Err(IndexError::Precondition(_)) => {}
            other => panic!("expected precondition error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_product() {
        assert_eq!("ndvi".parse::<Product>().unwrap(), Product::Ndvi);
        assert_eq!("WATER".parse::<Product>().unwrap(), Product::Water);
        assert!(matches!("NDWI".parse::<Product>(), Err(IndexError::UnknownProduct(_))));
    }

    #[test]
    fn test_storage_conversion_rounds_and_saturates() {
        let data = Array2::from_shape_vec(
            (1, 6),
            vec![3333.33, -2.5, 2.5, 1.0e9, f32::NEG_INFINITY, f32::NAN],
        )
        .unwrap();
        match ProductArray::from_computed(StorageType::Int16, data.clone()) {
            ProductArray::Int16(a) => {
                assert_eq!(a.as_slice().unwrap(), &[3333, -3, 3, i16::MAX, i16::MIN, 0]);
            }
            other => panic!("unexpected {:?}", other.data_type()),
        }
        match ProductArray::from_computed(StorageType::Byte, data) {
            ProductArray::Byte(a) => {
                assert_eq!(a.as_slice().unwrap(), &[255, 0, 3, 255, 0, 0]);
            }
            other => panic!("unexpected {:?}", other.data_type()),
        }
    }
}
