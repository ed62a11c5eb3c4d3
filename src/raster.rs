/// Raster read/write collaborators.
///
/// The pipeline only sees the `RasterReader` / `RasterWriter` traits; the
/// `GeoTiff` implementation backs them with single-band TIFF files.
///
/// Axis convention: the first array axis maps to TIFF rows. Grids are written
/// and read back exactly as laid out in memory, so any reorientation (such as
/// the transpose applied to the adjustment grid) belongs to the caller.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use crate::logging::{self, Component};
use crate::model::{IntGrid, PrecipError, ThresholdGrid};

// GeoTIFF tag numbers (OGC GeoTIFF 1.1)
const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;

/// Minimal key directory: geographic model, pixel-is-area, WGS84.
const WGS84_GEO_KEYS: [u16; 16] = [
    1, 1, 0, 3, // header: version 1.1.0, three keys
    1024, 0, 1, 2, // GTModelTypeGeoKey = ModelTypeGeographic
    1025, 0, 1, 1, // GTRasterTypeGeoKey = RasterPixelIsArea
    2048, 0, 1, 4326, // GeographicTypeGeoKey = GCS_WGS_84
];

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait RasterReader {
    /// Loads a single-band raster, widening any sample format to `f64`.
    fn read_raster(&self, path: &Path) -> Result<ThresholdGrid, PrecipError>;

    /// Loads a single-band integer raster without rescaling.
    fn read_int_raster(&self, path: &Path) -> Result<IntGrid, PrecipError>;
}

pub trait RasterWriter {
    /// Persists an integer grid; values must round-trip exactly.
    fn write_raster(&self, grid: &IntGrid, path: &Path) -> Result<(), PrecipError>;
}

impl<T: RasterReader + ?Sized> RasterReader for &T {
    fn read_raster(&self, path: &Path) -> Result<ThresholdGrid, PrecipError> {
        (**self).read_raster(path)
    }

    fn read_int_raster(&self, path: &Path) -> Result<IntGrid, PrecipError> {
        (**self).read_int_raster(path)
    }
}

impl<T: RasterWriter + ?Sized> RasterWriter for &T {
    fn write_raster(&self, grid: &IntGrid, path: &Path) -> Result<(), PrecipError> {
        (**self).write_raster(grid, path)
    }
}

// ---------------------------------------------------------------------------
// Georeferencing
// ---------------------------------------------------------------------------

/// Affine placement of a raster: coordinates of the outer corner of the
/// first pixel and the pixel size in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GeoReference {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoReference {
    /// The global 0.1° IMERG grid, anchored at (-180, 90).
    pub fn imerg_global() -> Self {
        Self {
            origin_x: -180.0,
            origin_y: 90.0,
            pixel_width: 0.1,
            pixel_height: 0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// GeoTIFF implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoTiff {
    georeference: Option<GeoReference>,
}

impl GeoTiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_georeference(georeference: Option<GeoReference>) -> Self {
        Self { georeference }
    }

    fn decode(path: &Path) -> Result<((usize, usize), DecodingResult), PrecipError> {
        let file = File::open(path).map_err(|e| PrecipError::io(path, e))?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let (width, height) = decoder.dimensions()?;
        let data = decoder.read_image()?;
        Ok(((height as usize, width as usize), data))
    }
}

fn format_error(path: &Path, reason: impl Into<String>) -> PrecipError {
    PrecipError::Format {
        file: path.display().to_string(),
        reason: reason.into(),
    }
}

fn check_single_band(path: &Path, shape: (usize, usize), len: usize) -> Result<(), PrecipError> {
    if shape.0 * shape.1 != len {
        return Err(format_error(
            path,
            format!(
                "expected one sample per pixel ({}x{}), found {} samples",
                shape.0, shape.1, len
            ),
        ));
    }
    Ok(())
}

impl RasterReader for GeoTiff {
    fn read_raster(&self, path: &Path) -> Result<ThresholdGrid, PrecipError> {
        let (shape, data) = Self::decode(path)?;

        #[allow(unreachable_patterns)]
        let values: Vec<f64> = match data {
            DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
            DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
            DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::F64(v) => v,
            _ => return Err(format_error(path, "unsupported sample format")),
        };

        check_single_band(path, shape, values.len())?;
        logging::debug(
            Component::Raster,
            Some(&path.display().to_string()),
            &format!("read {}x{} raster", shape.0, shape.1),
        );
        Ok(ThresholdGrid::from_shape_vec(shape, values)?)
    }

    fn read_int_raster(&self, path: &Path) -> Result<IntGrid, PrecipError> {
        let (shape, data) = Self::decode(path)?;

        let values: Vec<i16> = match data {
            DecodingResult::I16(v) => v,
            DecodingResult::I8(v) => v.into_iter().map(i16::from).collect(),
            DecodingResult::U8(v) => v.into_iter().map(i16::from).collect(),
            _ => {
                return Err(format_error(
                    path,
                    "expected 8 or 16-bit integer samples",
                ));
            }
        };

        check_single_band(path, shape, values.len())?;
        Ok(IntGrid::from_shape_vec(shape, values)?)
    }
}

impl RasterWriter for GeoTiff {
    fn write_raster(&self, grid: &IntGrid, path: &Path) -> Result<(), PrecipError> {
        let (rows, cols) = grid.dim();
        if rows == 0 || cols == 0 {
            return Err(PrecipError::InvalidInput(format!(
                "refusing to write empty {}x{} raster to {}",
                rows,
                cols,
                path.display()
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PrecipError::io(parent, e))?;
        }

        // logical (row-major) order regardless of memory layout
        let data: Vec<i16> = grid.iter().copied().collect();

        let file = File::create(path).map_err(|e| PrecipError::io(path, e))?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
        let mut image = encoder.new_image::<colortype::GrayI16>(cols as u32, rows as u32)?;

        if let Some(geo) = &self.georeference {
            let directory = image.encoder();
            directory.write_tag(
                Tag::Unknown(MODEL_PIXEL_SCALE_TAG),
                &[geo.pixel_width, geo.pixel_height, 0.0][..],
            )?;
            directory.write_tag(
                Tag::Unknown(MODEL_TIEPOINT_TAG),
                &[0.0, 0.0, 0.0, geo.origin_x, geo.origin_y, 0.0][..],
            )?;
            directory.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG), &WGS84_GEO_KEYS[..])?;
        }

        image.write_data(&data)?;

        logging::info(
            Component::Raster,
            Some(&path.display().to_string()),
            &format!("wrote {}x{} raster", rows, cols),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_int_raster_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accum.tif");
        let grid: IntGrid = array![[0, -3, 32767], [60, 1, -32768]];

        GeoTiff::new().write_raster(&grid, &path).unwrap();
        let back = GeoTiff::new().read_int_raster(&path).unwrap();

        assert_eq!(back, grid);
    }

    #[test]
    fn test_georeferenced_raster_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alert.tif");
        let grid: IntGrid = array![[0, 1, 2], [3, 2, 1]];

        GeoTiff::with_georeference(Some(GeoReference::imerg_global()))
            .write_raster(&grid, &path)
            .unwrap();

        assert_eq!(GeoTiff::new().read_int_raster(&path).unwrap(), grid);
        let widened = GeoTiff::new().read_raster(&path).unwrap();
        assert_eq!(widened[[1, 0]], 3.0);
    }

    #[test]
    fn test_transposed_grid_is_written_in_logical_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tif");
        let grid: IntGrid = array![[1, 2, 3], [4, 5, 6]];
        let transposed = grid.t().to_owned();

        GeoTiff::new().write_raster(&transposed, &path).unwrap();
        let back = GeoTiff::new().read_int_raster(&path).unwrap();

        assert_eq!(back.dim(), (3, 2));
        assert_eq!(back, transposed);
    }

    #[test]
    fn test_float64_raster_keeps_full_precision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adjustment.tif");
        let factors = [0.7f64, 1.0, 1.3, 0.1];

        let file = File::create(&path).unwrap();
        let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
        encoder
            .write_image::<colortype::Gray64Float>(2, 2, &factors)
            .unwrap();
        drop(encoder);

        let grid = GeoTiff::new().read_raster(&path).unwrap();
        assert_eq!(grid, array![[0.7, 1.0], [1.3, 0.1]]);
        assert_eq!(grid[[0, 0]] * 10.0, 7.0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = GeoTiff::new().read_raster(Path::new("/nonexistent/adjustment.tif"));
        assert!(matches!(result, Err(PrecipError::Io { .. })));
    }

    #[test]
    fn test_empty_grid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = GeoTiff::new().write_raster(&IntGrid::zeros((0, 4)), &dir.path().join("e.tif"));
        assert!(matches!(result, Err(PrecipError::InvalidInput(_))));
    }
}
