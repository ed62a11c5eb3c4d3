/// Test fixtures: synthetic half-hourly measurements and IMERG files.
///
/// The reference day is 2017-01-01 UTC; `half_hour(i)` is the start of the
/// i-th half-hour interval of that day (i may exceed 47).
///
/// GeoTIFF fixtures are written through the crate's own `GeoTiff` writer as
/// 16-bit integers in file layout (rows = latitude), matching the real GIS
/// product, so loading them exercises the transpose in `ImergDirectory`.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use std::path::{Path, PathBuf};

use crate::model::{Grid, IntGrid, Measurement, ThresholdGrid};
use crate::raster::{GeoTiff, RasterWriter};

pub(crate) fn half_hour(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(30 * i)
}

/// `count` consecutive measurements starting at `start`, each a 1x1 grid
/// holding `value`.
pub(crate) fn uniform_measurements(start: DateTime<Utc>, count: usize, value: f32) -> Vec<Measurement> {
    (0..count as i64)
        .map(|i| {
            Measurement::starting_at(start + Duration::minutes(30 * i), Grid::from_elem((1, 1), value))
        })
        .collect()
}

/// IMERG GIS filename for the interval starting at `start`.
pub(crate) fn imerg_gis_name(start: DateTime<Utc>) -> String {
    let last_second = start + Duration::minutes(30) - Duration::seconds(1);
    let minute_of_day = start.hour() * 60 + start.minute();
    format!(
        "3B-HHR-GIS.MS.MRG.3IMERG.{}-S{}-E{}.{:04}.V05B.tif",
        start.format("%Y%m%d"),
        start.format("%H%M%S"),
        last_second.format("%H%M%S"),
        minute_of_day
    )
}

/// Writes `file_grid` (rows = latitude) as the GIS file for `start`.
pub(crate) fn write_imerg_geotiff(dir: &Path, start: DateTime<Utc>, file_grid: &IntGrid) -> PathBuf {
    let path = dir.join(imerg_gis_name(start));
    GeoTiff::new().write_raster(file_grid, &path).unwrap();
    path
}

#[test]
fn test_fixture_names_parse() {
    let name = imerg_gis_name(half_hour(3));
    assert_eq!(name, "3B-HHR-GIS.MS.MRG.3IMERG.20170101-S013000-E015959.0090.V05B.tif");
    let meta = crate::ingest::imerg::parse_imerg_filename(&name).unwrap();
    assert_eq!(meta.start_dt, half_hour(3));
}

/// Raster reader that serves one fixed grid and counts reads.
pub(crate) struct FixedRaster {
    pub grid: ThresholdGrid,
    pub reads: std::cell::Cell<usize>,
}

impl FixedRaster {
    pub fn new(grid: ThresholdGrid) -> Self {
        Self {
            grid,
            reads: std::cell::Cell::new(0),
        }
    }
}

impl crate::raster::RasterReader for FixedRaster {
    fn read_raster(&self, _path: &Path) -> Result<ThresholdGrid, crate::model::PrecipError> {
        self.reads.set(self.reads.get() + 1);
        Ok(self.grid.clone())
    }

    fn read_int_raster(&self, path: &Path) -> Result<IntGrid, crate::model::PrecipError> {
        Ok(self.read_raster(path)?.mapv(|v| v as i16))
    }
}
