use crate::core::formula::ProductArray;
use crate::types::{BandArray, GeoTransform, IndexError, IndexResult, RasterGeometry};
use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, Driver, DriverManager, Metadata};
use ndarray::{Array2, Array3, Axis};
use std::path::Path;

/// Reflectance stack together with the grid and metadata it came with
#[derive(Debug, Clone)]
pub struct SourceRaster {
    pub bands: BandArray,
    pub geometry: RasterGeometry,
    /// Default-domain metadata items
    pub metadata: Vec<(String, String)>,
}

/// Everything needed to create one derived raster
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    /// GDAL driver short name, e.g. "GTiff"
    pub format: &'a str,
    /// Comma-separated KEY=VALUE creation options
    pub format_options: &'a str,
    pub geometry: &'a RasterGeometry,
    pub data: &'a ProductArray,
    pub nodata: f64,
    pub metadata: &'a [(String, String)],
}

/// Raster codec used by the derivation engine
pub trait RasterIo {
    /// Whether `path` exists and opens as a raster
    fn is_readable(&self, path: &Path) -> bool;

    /// Read every band of `path` as float
    fn read_stack(&self, path: &Path) -> IndexResult<SourceRaster>;

    /// Create `path` as a single-band raster and write `request.data` into it
    fn write_product(&self, path: &Path, request: &WriteRequest<'_>) -> IndexResult<()>;
}

/// Split "COMPRESS=LZW,BIGTIFF=YES" into key/value pairs
pub fn parse_format_options(options: &str) -> IndexResult<Vec<(String, String)>> {
    options
        .split(',')
        .map(str::trim)
        .filter(|option| !option.is_empty())
        .map(|option| {
            option
                .split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| {
                    IndexError::InvalidFormat(format!("Expected KEY=VALUE, got '{}'", option))
                })
        })
        .collect()
}

/// GDAL-backed raster codec
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalRasterIo;

impl GdalRasterIo {
    pub fn new() -> Self {
        Self
    }

    /// Read the first band of `path` as integers
    pub fn read_band_i32(&self, path: &Path) -> IndexResult<Array2<i32>> {
        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        let rasterband = dataset.rasterband(1)?;
        Ok(rasterband.read_as_array::<i32>((0, 0), (width, height), (width, height), None)?)
    }

    fn write_band<T: GdalType + Copy>(
        driver: &Driver,
        path: &Path,
        request: &WriteRequest<'_>,
        data: &Array2<T>,
        options: &[RasterCreationOption],
    ) -> IndexResult<()> {
        let (height, width) = data.dim();

        let mut dataset = driver.create_with_band_type_with_options::<T, _>(
            path,
            width as isize,
            height as isize,
            1,
            options,
        )?;

        if let Some(transform) = request.geometry.geo_transform {
            dataset.set_geo_transform(&transform.to_gdal())?;
        }
        if !request.geometry.projection.is_empty() {
            dataset.set_projection(&request.geometry.projection)?;
        }

        {
            let mut rasterband = dataset.rasterband(1)?;
            let flat_data: Vec<T> = data.iter().copied().collect();
            let buffer = Buffer::new((width, height), flat_data);
            rasterband.write((0, 0), (width, height), &buffer)?;
            rasterband.set_no_data_value(Some(request.nodata))?;
        }

        for (key, value) in request.metadata {
            dataset.set_metadata_item(key, value, "")?;
        }

        dataset.flush_cache();
        Ok(())
    }
}

impl RasterIo for GdalRasterIo {
    fn is_readable(&self, path: &Path) -> bool {
        path.exists() && Dataset::open(path).is_ok()
    }

    fn read_stack(&self, path: &Path) -> IndexResult<SourceRaster> {
        log::debug!("Reading reflectance stack from: {}", path.display());

        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count();
        if band_count < 1 {
            return Err(IndexError::Precondition(format!(
                "{} has no raster bands",
                path.display()
            )));
        }

        let mut bands = Array3::<f32>::zeros((band_count as usize, height, width));
        for index in 1..=band_count {
            let rasterband = dataset.rasterband(index)?;
            let band = rasterband.read_as_array::<f32>((0, 0), (width, height), (width, height), None)?;
            bands
                .index_axis_mut(Axis(0), (index - 1) as usize)
                .assign(&band);
        }

        let metadata = dataset
            .metadata_domain("")
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| {
                item.split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
            })
            .collect();

        let geometry = RasterGeometry {
            width,
            height,
            geo_transform: dataset.geo_transform().ok().map(GeoTransform::from_gdal),
            projection: dataset.projection(),
        };

        log::debug!("Stack size: {} bands of {}x{}", band_count, width, height);
        Ok(SourceRaster {
            bands,
            geometry,
            metadata,
        })
    }

    fn write_product(&self, path: &Path, request: &WriteRequest<'_>) -> IndexResult<()> {
        let expected = (request.geometry.height, request.geometry.width);
        if request.data.dim() != expected {
            return Err(IndexError::ShapeMismatch {
                expected,
                found: request.data.dim(),
            });
        }

        let driver = DriverManager::get_driver_by_name(request.format)?;
        let parsed = parse_format_options(request.format_options)?;
        let options: Vec<RasterCreationOption> = parsed
            .iter()
            .map(|(key, value)| RasterCreationOption {
                key: key.as_str(),
                value: value.as_str(),
            })
            .collect();

        match request.data {
            ProductArray::Int16(data) => Self::write_band(&driver, path, request, data, &options),
            ProductArray::Float32(data) => Self::write_band(&driver, path, request, data, &options),
            ProductArray::Byte(data) => Self::write_band(&driver, path, request, data, &options),
        }
    }
}
