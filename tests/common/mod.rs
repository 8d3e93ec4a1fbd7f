#![allow(dead_code)]

use chrono::NaiveDate;
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use indexstack::{
    IndexResult, InputTileSet, ProcessingLevel, QualityMask, StackContext, TileDescriptor,
    TileTypeInfo,
};
use ndarray::Array2;
use std::path::{Path, PathBuf};

pub const ROWS: usize = 4;
pub const COLS: usize = 4;
pub const NBAR_NAME: &str = "LS7_ETM_NBAR_150_-025_2000-02-09T23-46-12.722217.tif";
pub const PQA_NAME: &str = "LS7_ETM_PQA_150_-025_2000-02-09T23-46-12.722217.tif";

pub const GEO_TRANSFORM: [f64; 6] = [150.0, 0.00025, 0.0, -25.0, 0.0, -0.00025];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Six-band Int16 reflectance tile with every band uniform
pub fn write_reflectance_tile(dir: &Path, band_values: [i16; 6]) -> PathBuf {
    let path = dir.join(NBAR_NAME);
    let driver = DriverManager::get_driver_by_name("GTiff").expect("GTiff driver");
    let mut dataset = driver
        .create_with_band_type::<i16, _>(&path, COLS as isize, ROWS as isize, 6)
        .expect("Failed to create reflectance tile");

    dataset.set_geo_transform(&GEO_TRANSFORM).unwrap();
    dataset
        .set_spatial_ref(&SpatialRef::from_epsg(4326).unwrap())
        .unwrap();
    dataset
        .set_metadata_item("SATELLITE", "LS7", "")
        .unwrap();

    for (index, value) in band_values.iter().enumerate() {
        let mut band = dataset.rasterband(index as isize + 1).unwrap();
        let buffer = Buffer::new((COLS, ROWS), vec![*value; ROWS * COLS]);
        band.write((0, 0), (COLS, ROWS), &buffer).unwrap();
        band.set_no_data_value(Some(-999.0)).unwrap();
    }
    path
}

/// Single-band Int16 PQA tile with every pixel set to `word`
pub fn write_pqa_tile(dir: &Path, word: i16) -> PathBuf {
    let path = dir.join(PQA_NAME);
    let driver = DriverManager::get_driver_by_name("GTiff").expect("GTiff driver");
    let mut dataset = driver
        .create_with_band_type::<i16, _>(&path, COLS as isize, ROWS as isize, 1)
        .expect("Failed to create PQA tile");
    dataset.set_geo_transform(&GEO_TRANSFORM).unwrap();
    let mut band = dataset.rasterband(1).unwrap();
    let buffer = Buffer::new((COLS, ROWS), vec![word; ROWS * COLS]);
    band.write((0, 0), (COLS, ROWS), &buffer).unwrap();
    path
}

fn descriptor(level: ProcessingLevel, band_tag: &str, path: &Path) -> TileDescriptor {
    let start = NaiveDate::from_ymd_opt(2000, 2, 9)
        .unwrap()
        .and_hms_micro_opt(23, 46, 12, 722217)
        .unwrap();
    TileDescriptor {
        x_index: 150,
        y_index: -25,
        start_datetime: start,
        end_datetime: start + chrono::Duration::seconds(24),
        satellite_tag: "LS7".to_string(),
        sensor_name: "ETM+".to_string(),
        level_name: level.to_string(),
        band_name: format!("{} band", level),
        band_tag: band_tag.to_string(),
        tile_layer: 1,
        nodata_value: if level == ProcessingLevel::Nbar { Some(-999.0) } else { None },
        path: Some(91),
        start_row: Some(77),
        end_row: Some(77),
        tile_pathname: path.to_path_buf(),
    }
}

pub fn tile_set(nbar_path: &Path, pqa_path: &Path) -> InputTileSet {
    let mut input = InputTileSet::new();
    input.insert(ProcessingLevel::Nbar, descriptor(ProcessingLevel::Nbar, "B10", nbar_path));
    input.insert(ProcessingLevel::Pqa, descriptor(ProcessingLevel::Pqa, "PQA", pqa_path));
    input
}

pub fn stack_context(output_dir: &Path) -> StackContext {
    StackContext::new(150, -25, output_dir)
}

pub fn tile_type() -> TileTypeInfo {
    TileTypeInfo {
        format_options: "COMPRESS=LZW".to_string(),
        ..TileTypeInfo::default()
    }
}

pub fn clear_mask(_: &Path) -> IndexResult<QualityMask> {
    Ok(Array2::from_elem((ROWS, COLS), false))
}

pub fn full_mask(_: &Path) -> IndexResult<QualityMask> {
    Ok(Array2::from_elem((ROWS, COLS), true))
}

pub fn read_i16(path: &Path) -> (Vec<i16>, Option<f64>) {
    let dataset = Dataset::open(path).expect("Failed to open output");
    let band = dataset.rasterband(1).unwrap();
    let data = band
        .read_as::<i16>((0, 0), (COLS, ROWS), (COLS, ROWS), None)
        .unwrap();
    (data.data, band.no_data_value())
}

pub fn read_f32(path: &Path) -> (Vec<f32>, Option<f64>) {
    let dataset = Dataset::open(path).expect("Failed to open output");
    let band = dataset.rasterband(1).unwrap();
    let data = band
        .read_as::<f32>((0, 0), (COLS, ROWS), (COLS, ROWS), None)
        .unwrap();
    (data.data, band.no_data_value())
}

pub fn read_u8(path: &Path) -> (Vec<u8>, Option<f64>) {
    let dataset = Dataset::open(path).expect("Failed to open output");
    let band = dataset.rasterband(1).unwrap();
    let data = band
        .read_as::<u8>((0, 0), (COLS, ROWS), (COLS, ROWS), None)
        .unwrap();
    (data.data, band.no_data_value())
}

pub fn output_path(output_dir: &Path, tag: &str) -> PathBuf {
    output_dir.join(NBAR_NAME.replace("NBAR", tag))
}

pub fn lock_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().map_or(false, |ext| ext == "lock"))
                .collect()
        })
        .unwrap_or_default()
}
