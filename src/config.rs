/// Configuration loaders - severity threshold table and service settings
///
/// Separates threshold values and file locations from code, so thresholds
/// can be recalibrated or new duration classes added without recompiling.
/// Every path is carried in `ServiceConfig` and handed to constructors
/// explicitly; nothing here is a process-wide constant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::PrecipError;
use crate::raster::GeoReference;

/// Default service configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gpm_alert.toml";

// ---------------------------------------------------------------------------
// Threshold table
// ---------------------------------------------------------------------------

/// Scalar severity multipliers for one duration class.
///
/// No ordering between the three levels is enforced; a table with
/// `medium < low` is accepted as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SeverityLevels {
    pub low: i32,
    pub medium: i32,
    pub high: i32,
}

impl SeverityLevels {
    /// True when `low <= medium <= high`.
    pub fn is_ascending(&self) -> bool {
        self.low <= self.medium && self.medium <= self.high
    }
}

/// Threshold sections keyed by whole hours.
///
/// The file holds one table per duration class, named `"<hours> Hours"`:
///
/// ```toml
/// ["6 Hours"]
/// low = 20
/// medium = 40
/// high = 80
/// ```
///
/// Tables whose name does not follow that pattern are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdTable {
    sections: BTreeMap<u32, SeverityLevels>,
}

impl ThresholdTable {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PrecipError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            PrecipError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
            .map_err(|e| PrecipError::Configuration(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, PrecipError> {
        let table: toml::Table = toml::from_str(contents)
            .map_err(|e| PrecipError::Configuration(format!("malformed threshold file: {}", e)))?;

        let mut sections = BTreeMap::new();
        for (name, value) in table {
            let Some(hours) = parse_section_name(&name) else {
                continue;
            };
            let levels: SeverityLevels = value.try_into().map_err(|e| {
                PrecipError::Configuration(format!("section \"{}\": {}", name, e))
            })?;
            sections.insert(hours, levels);
        }

        Ok(Self { sections })
    }

    /// Builds a table directly from `(hours, levels)` pairs.
    pub fn from_sections<I: IntoIterator<Item = (u32, SeverityLevels)>>(sections: I) -> Self {
        Self {
            sections: sections.into_iter().collect(),
        }
    }

    /// Resolves the section for a duration class.
    pub fn levels(&self, hours: u32) -> Result<SeverityLevels, PrecipError> {
        self.sections.get(&hours).copied().ok_or_else(|| {
            PrecipError::Configuration(format!(
                "no \"{}\" section in threshold table",
                section_name(hours)
            ))
        })
    }

    /// Configured duration classes, ascending.
    pub fn hours(&self) -> Vec<u32> {
        self.sections.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Section name for a duration class, e.g. `"6 Hours"`.
pub fn section_name(hours: u32) -> String {
    format!("{} Hours", hours)
}

/// Inverse of `section_name`; only the exact canonical form matches.
fn parse_section_name(name: &str) -> Option<u32> {
    let hours: u32 = name.strip_suffix(" Hours")?.parse().ok()?;
    (section_name(hours) == name).then_some(hours)
}

// ---------------------------------------------------------------------------
// Service configuration
// ---------------------------------------------------------------------------

/// Service settings loaded from `gpm_alert.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding IMERG half-hourly GeoTIFF files
    pub data_dir: PathBuf,
    /// Where alert and accumulation rasters are written
    pub output_dir: PathBuf,
    /// Threshold table (see `ThresholdTable`)
    pub thresholds_file: PathBuf,
    /// Spatial adjustment raster shared by every duration class
    pub adjustment_grid: PathBuf,
    #[serde(default = "default_durations")]
    pub durations_hours: Vec<u32>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub georeference: Option<GeoReference>,
}

fn default_durations() -> Vec<u32> {
    vec![6]
}

impl ServiceConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PrecipError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            PrecipError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
            .map_err(|e| PrecipError::Configuration(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, PrecipError> {
        let config: ServiceConfig = toml::from_str(contents)
            .map_err(|e| PrecipError::Configuration(e.to_string()))?;
        if config.durations_hours.iter().any(|&h| h == 0) {
            return Err(PrecipError::Configuration(
                "durations_hours must contain positive values".to_string(),
            ));
        }
        Ok(config)
    }

    /// Loads `.env` if present, then the file named by `GPM_ALERT_CONFIG`
    /// (default `gpm_alert.toml`), then applies the `GPM_DATA_DIR` and
    /// `GPM_OUTPUT_DIR` overrides.
    pub fn from_env() -> Result<Self, PrecipError> {
        dotenv::dotenv().ok();

        let path = env::var("GPM_ALERT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Self::load(&path)?;
        config.apply_overrides(env::var("GPM_DATA_DIR").ok(), env::var("GPM_OUTPUT_DIR").ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, data_dir: Option<String>, output_dir: Option<String>) {
        if let Some(dir) = data_dir.filter(|d| !d.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = output_dir.filter(|d| !d.is_empty()) {
            self.output_dir = PathBuf::from(dir);
        }
    }
}
