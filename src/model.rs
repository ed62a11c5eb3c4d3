/// Core data types for the precipitation alert service.
///
/// This module defines the shared domain model imported by all other modules:
/// the half-hourly `Measurement`, the grid aliases used throughout the
/// pipeline, and the single `PrecipError` type every operation returns.

use chrono::{DateTime, Duration, Utc};
use ndarray::{Array2, Array3};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Grid types
// ---------------------------------------------------------------------------

/// Floating point grid of measurement intensities. Axis 0 is x (longitude),
/// axis 1 is y (latitude).
pub type Grid = Array2<f32>;

/// Double precision grid: raw raster samples, adjustment factors and the
/// derived threshold grids. Same axis convention as `Grid`.
pub type ThresholdGrid = Array2<f64>;

/// Integer grid: accumulated totals and alert levels.
pub type IntGrid = Array2<i16>;

/// Stack of measurement grids along a leading time axis.
pub type SeriesArray = Array3<f32>;

/// Nominal length of a single measurement interval.
pub const MEASUREMENT_MINUTES: i64 = 30;

pub fn measurement_interval() -> Duration {
    Duration::minutes(MEASUREMENT_MINUTES)
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// One half-hour precipitation observation.
///
/// Values are kept at the scale of the source format (no unit conversion
/// happens on load).
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub start_dt: DateTime<Utc>,
    pub end_dt: DateTime<Utc>,
    pub grid: Grid,
}

impl Measurement {
    /// Builds a measurement, checking that the interval spans exactly one
    /// half hour.
    pub fn new(
        start_dt: DateTime<Utc>,
        end_dt: DateTime<Utc>,
        grid: Grid,
    ) -> Result<Self, PrecipError> {
        if end_dt - start_dt != measurement_interval() {
            return Err(PrecipError::Format {
                file: format!("measurement starting {}", start_dt),
                reason: format!(
                    "interval {} -> {} is not {} minutes",
                    start_dt, end_dt, MEASUREMENT_MINUTES
                ),
            });
        }
        Ok(Self { start_dt, end_dt, grid })
    }

    /// Builds the measurement whose interval starts at `start_dt`.
    pub fn starting_at(start_dt: DateTime<Utc>, grid: Grid) -> Self {
        Self {
            start_dt,
            end_dt: start_dt + measurement_interval(),
            grid,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.grid.dim()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while assembling a series, resolving thresholds,
/// or reading and writing rasters. None of them are recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum PrecipError {
    /// The window did not contain exactly the expected number of measurements.
    #[error(
        "incomplete series for window ({start_dt}, {end_dt}]: expected {expected} measurements, found {found}"
    )]
    Incomplete {
        start_dt: DateTime<Utc>,
        end_dt: DateTime<Utc>,
        expected: usize,
        found: usize,
    },

    /// Strict contiguity was requested and the retained measurements are not
    /// consecutive half hours ending at the window bound.
    #[error("series is not contiguous: expected interval ending {expected}, found {found}")]
    Discontinuous {
        expected: DateTime<Utc>,
        found: DateTime<Utc>,
    },

    /// Threshold or service configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A caller supplied a value the pipeline cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Two grids that must share a shape do not.
    #[error("grid shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// The measurement source holds no measurements at all.
    #[error("no measurements available in {0}")]
    EmptySource(String),

    /// A measurement file or raster could not be interpreted.
    #[error("cannot read {file}: {reason}")]
    Format { file: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl PrecipError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrecipError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the failure kinds caused by missing or surplus data rather
    /// than by configuration or I/O.
    pub fn is_data_gap(&self) -> bool {
        matches!(
            self,
            PrecipError::Incomplete { .. }
                | PrecipError::Discontinuous { .. }
                | PrecipError::EmptySource(_)
        )
    }
}
