/// Per-cell alert classification.
///
/// `AlertDetector` ties one `PrecipTimeSeries` to the `ThresholdSet` of its
/// duration class. `detect()` counts, per cell, how many of the low / medium /
/// high threshold grids the accumulation strictly exceeds (0..=3). The result
/// is computed once and cached: the detector moves from undetected to
/// detected and never back, so a new series needs a new detector.

use chrono::{DateTime, Utc};
use ndarray::Zip;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::ThresholdTable;
use crate::ingest::MeasurementSource;
use crate::logging::{self, Component, hours_context};
use crate::model::{IntGrid, PrecipError, ThresholdGrid};
use crate::raster::{RasterReader, RasterWriter};
use crate::series::PrecipTimeSeries;

use super::thresholds::ThresholdSet;

/// Number of alert levels, including "no alert".
pub const ALERT_LEVELS: usize = 4;

/// Output filename for the alert raster of a duration class.
pub fn alert_filename(hours: u32) -> String {
    format!("gpm_alert_{:03}h.tif", hours)
}

/// Output filename for the accumulation raster of a duration class.
pub fn accumulation_filename(hours: u32) -> String {
    format!("gpm_accum_{:03}h.tif", hours)
}

/// Counts, per cell, the threshold grids strictly exceeded by the
/// accumulation.
///
/// # Errors
/// `PrecipError::ShapeMismatch` when a threshold grid does not match the
/// accumulation's shape.
pub fn classify(accumulation: &IntGrid, thresholds: &[&ThresholdGrid]) -> Result<IntGrid, PrecipError> {
    let mut levels = IntGrid::zeros(accumulation.dim());
    for threshold in thresholds {
        if threshold.dim() != accumulation.dim() {
            return Err(PrecipError::ShapeMismatch {
                expected: accumulation.dim(),
                found: threshold.dim(),
            });
        }
        Zip::from(&mut levels)
            .and(accumulation)
            .and(*threshold)
            .for_each(|level, &total, &limit| {
                if f64::from(total) > limit {
                    *level += 1;
                }
            });
    }
    Ok(levels)
}

/// Cell counts per alert level for one detection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub hours: u32,
    pub start_dt: DateTime<Utc>,
    pub end_dt: DateTime<Utc>,
    pub cells: usize,
    /// `counts[n]` = number of cells at alert level n
    pub counts: [usize; ALERT_LEVELS],
    pub max_accumulation: i16,
}

impl AlertSummary {
    /// Cells at level 1 or above.
    pub fn alerting_cells(&self) -> usize {
        self.counts[1..].iter().sum()
    }
}

fn level_counts(alert: &IntGrid) -> [usize; ALERT_LEVELS] {
    let mut counts = [0; ALERT_LEVELS];
    for &level in alert {
        if let Some(slot) = counts.get_mut(level as usize) {
            *slot += 1;
        }
    }
    counts
}

pub struct AlertDetector<S: MeasurementSource, R: RasterReader> {
    series: PrecipTimeSeries<S>,
    thresholds: ThresholdSet<R>,
    alert: Option<IntGrid>,
}

impl<S: MeasurementSource, R: RasterReader> AlertDetector<S, R> {
    /// Builds the detector for `series`, resolving the threshold section for
    /// its whole-hour duration class.
    ///
    /// # Errors
    /// `PrecipError::Configuration` when the table has no section for the
    /// series' duration class.
    pub fn new<P: Into<PathBuf>>(
        series: PrecipTimeSeries<S>,
        table: &ThresholdTable,
        adjustment_path: P,
        reader: R,
    ) -> Result<Self, PrecipError> {
        let thresholds = ThresholdSet::new(series.duration_hours(), table, adjustment_path, reader)?;
        Self::with_thresholds(series, thresholds)
    }

    /// Pairs a series with an already resolved threshold set.
    ///
    /// # Errors
    /// `PrecipError::InvalidInput` when the set belongs to another duration
    /// class.
    pub fn with_thresholds(
        series: PrecipTimeSeries<S>,
        thresholds: ThresholdSet<R>,
    ) -> Result<Self, PrecipError> {
        if thresholds.hours() != series.duration_hours() {
            return Err(PrecipError::InvalidInput(format!(
                "threshold set for {} hours cannot classify a {} hour series",
                thresholds.hours(),
                series.duration_hours()
            )));
        }
        Ok(Self {
            series,
            thresholds,
            alert: None,
        })
    }

    pub fn hours(&self) -> u32 {
        self.series.duration_hours()
    }

    pub fn series(&mut self) -> &mut PrecipTimeSeries<S> {
        &mut self.series
    }

    pub fn thresholds(&mut self) -> &mut ThresholdSet<R> {
        &mut self.thresholds
    }

    pub fn is_detected(&self) -> bool {
        self.alert.is_some()
    }

    /// Alert level per cell (0..=3). Computed on first call, cached after.
    pub fn detect(&mut self) -> Result<&IntGrid, PrecipError> {
        let alert = match self.alert.take() {
            Some(alert) => alert,
            None => {
                let accumulation = self.series.accumulation()?;
                let thresholds = self.thresholds.grids()?;
                let alert = classify(accumulation, &thresholds)?;

                let counts = level_counts(&alert);
                logging::info(
                    Component::Detector,
                    Some(&hours_context(self.series.duration_hours())),
                    &format!(
                        "alert levels 0/1/2/3: {}/{}/{}/{} cells",
                        counts[0], counts[1], counts[2], counts[3]
                    ),
                );
                alert
            }
        };
        let alert: &IntGrid = self.alert.insert(alert);
        Ok(alert)
    }

    /// Runs detection if needed and writes the alert raster into
    /// `output_dir`, returning the written path.
    pub fn save<W: RasterWriter>(&mut self, writer: &W, output_dir: &Path) -> Result<PathBuf, PrecipError> {
        let path = output_dir.join(alert_filename(self.hours()));
        let alert = self.detect()?;
        writer.write_raster(alert, &path)?;
        Ok(path)
    }

    /// Writes the series accumulation into `output_dir`, returning the path.
    pub fn save_accumulation<W: RasterWriter>(
        &mut self,
        writer: &W,
        output_dir: &Path,
    ) -> Result<PathBuf, PrecipError> {
        let path = output_dir.join(accumulation_filename(self.hours()));
        self.series.save_accumulation(writer, &path)?;
        Ok(path)
    }

    pub fn summary(&mut self) -> Result<AlertSummary, PrecipError> {
        let counts = level_counts(self.detect()?);
        let accumulation = self.series.accumulation()?;
        let max_accumulation = accumulation.iter().copied().max().unwrap_or(0);
        let cells = accumulation.len();

        Ok(AlertSummary {
            hours: self.series.duration_hours(),
            start_dt: self.series.start_dt(),
            end_dt: self.series.end_dt(),
            cells,
            counts,
            max_accumulation,
        })
    }
}
