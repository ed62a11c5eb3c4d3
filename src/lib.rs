/// gpm_alert: gridded precipitation alerting from GPM IMERG half-hourly data.
///
/// Assembles a window of half-hourly satellite precipitation grids, checks
/// that the window is complete, accumulates it, and classifies every cell
/// against spatially adjusted severity thresholds.
///
/// # Module structure
///
/// ```text
/// gpm_alert
/// ├── model       — shared data types (Measurement, Grid, IntGrid, PrecipError)
/// ├── logging     — leveled console/file logging
/// ├── config      — threshold table ("<hours> Hours" sections) + service config
/// ├── raster      — RasterReader / RasterWriter traits, GeoTIFF implementation
/// ├── ingest
/// │   ├── imerg   — IMERG filename parsing + directory source
/// │   ├── memory  — in-memory source
/// │   └── fixtures (test only) — synthetic measurements and files
/// ├── series      — window assembly, completeness check, accumulation
/// └── alert
///     ├── thresholds — severity levels × adjustment grid per duration class
///     └── detector   — per-cell alert level (0..=3), persistence, summary
/// ```

pub mod alert;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod raster;
pub mod series;

pub use alert::{AlertDetector, AlertSummary, Severity, ThresholdSet};
pub use config::{ServiceConfig, SeverityLevels, ThresholdTable};
pub use ingest::{ImergDirectory, MeasurementSource, MemorySource};
pub use model::{Grid, IntGrid, Measurement, PrecipError, ThresholdGrid};
pub use raster::{GeoReference, GeoTiff, RasterReader, RasterWriter};
pub use series::PrecipTimeSeries;
