/// NASA GPM IMERG half-hourly products.
///
/// Handles filename parsing and directory discovery for the half-hourly
/// ("HHR") IMERG files, e.g.
///   3B-HHR-E.MS.MRG.3IMERG.20170101-S000000-E002959.0000.V04A.RT-H5
///   3B-HHR-GIS.MS.MRG.3IMERG.20170101-S000000-E002959.0000.V05B.tif
///
/// Filename anatomy (dot-separated):
///   product . MS . MRG . 3IMERG . YYYYMMDD-Shhmmss-Ehhmmss . minute-of-day . version [. ext]
///
/// The `E` stamp is the last second covered by the file (hh:29:59 or
/// hh:59:59). `end_dt` is normalised to the exclusive bound one second later,
/// so every parsed interval is exactly thirty minutes long.
///
/// Only the GeoTIFF ("GIS") flavour is loadable here; its rasters are laid out
/// latitude-by-longitude and are transposed on load into the series
/// convention (axis 0 = longitude).

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use std::fs;
use std::path::PathBuf;

use crate::logging::{self, Component};
use crate::model::{Measurement, PrecipError};
use crate::raster::{GeoTiff, RasterReader};

use super::MeasurementSource;

const HALF_HOURLY_PREFIX: &str = "3B-HHR";

// ---------------------------------------------------------------------------
// Filename parsing
// ---------------------------------------------------------------------------

/// Metadata carried by an IMERG half-hourly filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImergFileName {
    /// e.g. "3B-HHR-E" (early run), "3B-HHR-L" (late), "3B-HHR-GIS"
    pub product: String,
    pub start_dt: DateTime<Utc>,
    pub end_dt: DateTime<Utc>,
    /// Minutes since 00:00 UTC of the interval start, as encoded in the name
    pub minute_of_day: u32,
    /// Algorithm version, e.g. "V05B"
    pub version: String,
}

fn parse_error(name: &str, reason: impl Into<String>) -> PrecipError {
    PrecipError::Format {
        file: name.to_string(),
        reason: reason.into(),
    }
}

fn parse_clock(name: &str, stamp: &str, marker: char) -> Result<NaiveTime, PrecipError> {
    let digits = stamp
        .strip_prefix(marker)
        .ok_or_else(|| parse_error(name, format!("expected '{}' time stamp, got '{}'", marker, stamp)))?;
    NaiveTime::parse_from_str(digits, "%H%M%S")
        .map_err(|e| parse_error(name, format!("bad time stamp '{}': {}", stamp, e)))
}

/// Parses an IMERG half-hourly filename.
///
/// # Errors
/// `PrecipError::Format` when the name is not a half-hourly IMERG name, when
/// a timestamp field is malformed, or when the interval is not 30 minutes.
pub fn parse_imerg_filename(name: &str) -> Result<ImergFileName, PrecipError> {
    if !name.starts_with(HALF_HOURLY_PREFIX) {
        return Err(parse_error(name, "not an IMERG half-hourly product"));
    }

    let fields: Vec<&str> = name.split('.').collect();
    let time_idx = fields
        .iter()
        .position(|f| f.len() == 24 && f.as_bytes().get(8) == Some(&b'-'))
        .ok_or_else(|| parse_error(name, "missing YYYYMMDD-Shhmmss-Ehhmmss field"))?;

    let mut stamps = fields[time_idx].split('-');
    let (Some(date), Some(start), Some(end)) = (stamps.next(), stamps.next(), stamps.next()) else {
        return Err(parse_error(name, "malformed time field"));
    };

    let date = NaiveDate::parse_from_str(date, "%Y%m%d")
        .map_err(|e| parse_error(name, format!("bad date '{}': {}", date, e)))?;
    let start_time = parse_clock(name, start, 'S')?;
    let end_time = parse_clock(name, end, 'E')?;

    let start_dt = date.and_time(start_time).and_utc();
    let end_dt = date.and_time(end_time).and_utc() + Duration::seconds(1);
    if end_dt - start_dt != crate::model::measurement_interval() {
        return Err(parse_error(
            name,
            format!("interval {} -> {} is not a half hour", start_dt, end_dt),
        ));
    }

    let minute_of_day = fields
        .get(time_idx + 1)
        .and_then(|f| f.parse::<u32>().ok())
        .ok_or_else(|| parse_error(name, "missing minute-of-day field"))?;
    let expected_minute = start_time.hour() * 60 + start_time.minute();
    if minute_of_day != expected_minute {
        return Err(parse_error(
            name,
            format!(
                "minute-of-day {} does not match start {} ({})",
                minute_of_day, start_time, expected_minute
            ),
        ));
    }
    let version = fields
        .get(time_idx + 2)
        .map(|v| v.to_string())
        .ok_or_else(|| parse_error(name, "missing version field"))?;

    Ok(ImergFileName {
        product: fields[0].to_string(),
        start_dt,
        end_dt,
        minute_of_day,
        version,
    })
}

/// True for names that look like loadable IMERG half-hourly GeoTIFFs.
pub fn is_half_hourly_geotiff(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    name.starts_with(HALF_HOURLY_PREFIX) && (lower.ends_with(".tif") || lower.ends_with(".tiff"))
}

// ---------------------------------------------------------------------------
// Directory source
// ---------------------------------------------------------------------------

/// A directory of IMERG half-hourly GeoTIFF files.
#[derive(Debug, Clone)]
pub struct ImergDirectory<R: RasterReader = GeoTiff> {
    dir: PathBuf,
    reader: R,
}

impl ImergDirectory<GeoTiff> {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self::with_reader(dir, GeoTiff::new())
    }
}

impl<R: RasterReader> ImergDirectory<R> {
    pub fn with_reader<P: Into<PathBuf>>(dir: P, reader: R) -> Self {
        Self {
            dir: dir.into(),
            reader,
        }
    }
}

impl<R: RasterReader> MeasurementSource for ImergDirectory<R> {
    fn list_measurements(&self) -> Result<Vec<String>, PrecipError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| PrecipError::io(&self.dir, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PrecipError::io(&self.dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if is_half_hourly_geotiff(name) {
                    names.push(name.to_string());
                }
            }
        }

        // date then S stamp lead the name, so lexicographic = chronological
        names.sort();
        logging::debug(
            Component::Ingest,
            Some(&self.dir.display().to_string()),
            &format!("discovered {} half-hourly files", names.len()),
        );
        Ok(names)
    }

    fn load_measurement(&self, id: &str) -> Result<Measurement, PrecipError> {
        let meta = parse_imerg_filename(id)?;
        let raster = self.reader.read_raster(&self.dir.join(id))?;
        logging::debug(
            Component::Ingest,
            Some(id),
            &format!("{} {} starting {}", meta.product, meta.version, meta.start_dt),
        );
        // rows are latitude in the file; the series is indexed longitude-first
        let grid = raster.reversed_axes().mapv(|v| v as f32);
        Measurement::new(meta.start_dt, meta.end_dt, grid)
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}
