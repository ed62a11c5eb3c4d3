/// Precipitation alerting.
///
/// Submodules:
/// - `thresholds` — severity levels × spatial adjustment grid per duration class
/// - `detector`   — per-cell alert level (0..=3) and its persistence

pub mod detector;
pub mod thresholds;

pub use detector::{AlertDetector, AlertSummary, alert_filename, accumulation_filename, classify};
pub use thresholds::{Severity, ThresholdSet, whole_hours};
