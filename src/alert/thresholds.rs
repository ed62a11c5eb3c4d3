/// Spatially adjusted severity thresholds.
///
/// A `ThresholdSet` resolves the three scalar levels for one duration class
/// from the threshold table at construction, and derives each full-resolution
/// threshold grid (`scalar × adjustment`) on first use. The adjustment raster
/// is read once, on demand, and transposed into the series axis order.
///
/// Adjustment factors and threshold grids are held in `f64`, so a threshold
/// such as `10 × 0.7` is exactly 7 and an accumulation of 7 does not exceed it.
///
/// Level ordering is not checked: a table with `medium < low` is used as
/// written and simply yields a non-monotonic alert count.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::config::{SeverityLevels, ThresholdTable, section_name};
use crate::logging::{self, Component, hours_context};
use crate::model::{PrecipError, ThresholdGrid};
use crate::raster::RasterReader;

/// Severity levels, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::High];

    fn index(self) -> usize {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// Converts a caller-supplied hour count into a duration class.
///
/// # Errors
/// `PrecipError::InvalidInput` for fractional, negative, or non-finite values.
pub fn whole_hours(hours: f64) -> Result<u32, PrecipError> {
    if !hours.is_finite() || hours < 0.0 || hours.fract() != 0.0 || hours > f64::from(u32::MAX) {
        return Err(PrecipError::InvalidInput(format!(
            "duration class must be a whole number of hours, got {}",
            hours
        )));
    }
    Ok(hours as u32)
}

pub struct ThresholdSet<R: RasterReader> {
    hours: u32,
    levels: SeverityLevels,
    adjustment_path: PathBuf,
    reader: R,

    // lazily derived, never invalidated
    adjustment: Option<ThresholdGrid>,
    grids: [Option<ThresholdGrid>; 3],
}

impl<R: RasterReader> ThresholdSet<R> {
    /// Resolves the `"<hours> Hours"` section of `table`.
    ///
    /// # Errors
    /// `PrecipError::Configuration` when the table has no such section.
    pub fn new<P: Into<PathBuf>>(
        hours: u32,
        table: &ThresholdTable,
        adjustment_path: P,
        reader: R,
    ) -> Result<Self, PrecipError> {
        let levels = table.levels(hours)?;
        let context = hours_context(hours);

        logging::debug(
            Component::Thresholds,
            Some(&context),
            &format!(
                "resolved \"{}\": low={} medium={} high={}",
                section_name(hours),
                levels.low,
                levels.medium,
                levels.high
            ),
        );
        if !levels.is_ascending() {
            logging::warn(
                Component::Thresholds,
                Some(&context),
                "severity levels are not ascending; alert counts will not rank severity",
            );
        }

        Ok(Self {
            hours,
            levels,
            adjustment_path: adjustment_path.into(),
            reader,
            adjustment: None,
            grids: [None, None, None],
        })
    }

    pub fn hours(&self) -> u32 {
        self.hours
    }

    pub fn levels(&self) -> SeverityLevels {
        self.levels
    }

    pub fn scalar(&self, severity: Severity) -> i32 {
        match severity {
            Severity::Low => self.levels.low,
            Severity::Medium => self.levels.medium,
            Severity::High => self.levels.high,
        }
    }

    /// Spatial adjustment grid in series axis order.
    pub fn adjustment(&mut self) -> Result<&ThresholdGrid, PrecipError> {
        let adjustment = match self.adjustment.take() {
            Some(adjustment) => adjustment,
            None => {
                let raw = self.reader.read_raster(&self.adjustment_path)?;
                logging::info(
                    Component::Thresholds,
                    Some(&hours_context(self.hours)),
                    &format!(
                        "loaded {}x{} adjustment grid from {}",
                        raw.nrows(),
                        raw.ncols(),
                        self.adjustment_path.display()
                    ),
                );
                // the adjustment file is stored rows=y, the series is x-first
                raw.reversed_axes()
            }
        };
        let adjustment: &ThresholdGrid = self.adjustment.insert(adjustment);
        Ok(adjustment)
    }

    /// Threshold grid for `severity`: scalar × adjustment, element-wise.
    pub fn grid(&mut self, severity: Severity) -> Result<&ThresholdGrid, PrecipError> {
        let idx = severity.index();
        let grid = match self.grids[idx].take() {
            Some(grid) => grid,
            None => {
                let scalar = f64::from(self.scalar(severity));
                self.adjustment()?.mapv(|factor| scalar * factor)
            }
        };
        let grid: &ThresholdGrid = self.grids[idx].insert(grid);
        Ok(grid)
    }

    pub fn low(&mut self) -> Result<&ThresholdGrid, PrecipError> {
        self.grid(Severity::Low)
    }

    pub fn medium(&mut self) -> Result<&ThresholdGrid, PrecipError> {
        self.grid(Severity::Medium)
    }

    pub fn high(&mut self) -> Result<&ThresholdGrid, PrecipError> {
        self.grid(Severity::High)
    }

    /// All three threshold grids, low to high.
    pub fn grids(&mut self) -> Result<[&ThresholdGrid; 3], PrecipError> {
        for severity in Severity::ALL {
            self.grid(severity)?;
        }
        match &self.grids {
            [Some(low), Some(medium), Some(high)] => Ok([low, medium, high]),
            _ => Err(PrecipError::InvalidInput(
                "threshold grids missing after derivation".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::FixedRaster;
    use ndarray::array;

    fn table() -> ThresholdTable {
        ThresholdTable::from_sections([(6, SeverityLevels { low: 20, medium: 40, high: 80 })])
    }

    #[test]
    fn test_unknown_duration_class_fails_at_construction() {
        let reader = FixedRaster::new(ThresholdGrid::ones((1, 1)));
        let result = ThresholdSet::new(12, &table(), "adjust.tif", &reader);
        assert!(matches!(result, Err(PrecipError::Configuration(_))));
        assert_eq!(reader.reads.get(), 0);
    }

    #[test]
    fn test_adjustment_is_loaded_lazily_and_once() {
        let reader = FixedRaster::new(ThresholdGrid::ones((2, 3)));
        let mut set = ThresholdSet::new(6, &table(), "adjust.tif", &reader).unwrap();
        assert_eq!(reader.reads.get(), 0);

        set.low().unwrap();
        set.medium().unwrap();
        set.high().unwrap();
        set.grids().unwrap();
        assert_eq!(reader.reads.get(), 1);
    }

    #[test]
    fn test_threshold_grid_is_scalar_times_transposed_adjustment() {
        // file layout: one row (y) of three columns (x)
        let reader = FixedRaster::new(array![[1.0, 0.5, 2.0]]);
        let mut set = ThresholdSet::new(6, &table(), "adjust.tif", &reader).unwrap();

        assert_eq!(set.adjustment().unwrap().dim(), (3, 1));
        assert_eq!(set.low().unwrap(), &array![[20.0], [10.0], [40.0]]);
        assert_eq!(set.high().unwrap(), &array![[80.0], [40.0], [160.0]]);
    }

    #[test]
    fn test_fractional_factor_threshold_is_exact() {
        let table = ThresholdTable::from_sections([(6, SeverityLevels { low: 10, medium: 20, high: 30 })]);
        let reader = FixedRaster::new(array![[0.7]]);
        let mut set = ThresholdSet::new(6, &table, "adjust.tif", &reader).unwrap();

        let low = set.low().unwrap();
        assert_eq!(low[[0, 0]], 7.0);
        let levels = crate::alert::classify(&array![[7i16]], &[low]).unwrap();
        assert_eq!(levels[[0, 0]], 0);
    }

    #[test]
    fn test_unordered_levels_are_kept() {
        let unordered =
            ThresholdTable::from_sections([(3, SeverityLevels { low: 50, medium: 10, high: 90 })]);
        let reader = FixedRaster::new(ThresholdGrid::ones((1, 1)));
        let mut set = ThresholdSet::new(3, &unordered, "adjust.tif", &reader).unwrap();

        assert_eq!(set.scalar(Severity::Low), 50);
        assert_eq!(set.medium().unwrap()[[0, 0]], 10.0);
    }

    #[test]
    fn test_whole_hours_validation() {
        assert_eq!(whole_hours(6.0).unwrap(), 6);
        assert!(matches!(whole_hours(6.5), Err(PrecipError::InvalidInput(_))));
        assert!(whole_hours(-1.0).is_err());
        assert!(whole_hours(f64::NAN).is_err());
    }
}
