/// Time series of half-hourly precipitation measurements.
///
/// A `PrecipTimeSeries` describes a window `(end_dt - duration, end_dt]` over
/// a measurement source. Nothing is read at construction; the first call to
/// `series()` (or anything derived from it) scans the source, keeps every
/// measurement whose `end_dt` falls inside the window, and requires exactly
/// `duration / 30min` of them. The stacked grids and the accumulation are
/// cached for the lifetime of the object and never invalidated, so build a
/// fresh series per request.
///
/// # Window membership
///
/// A measurement qualifies iff `start_dt < measurement.end_dt <= end_dt`.
/// Only the count is validated by default; `with_contiguity_check(true)`
/// additionally requires the retained intervals to be the consecutive half
/// hours ending at `end_dt`.
///
/// # Durations that are not whole half hours
///
/// The expected count is `duration / 30min` with integer division, so
/// 5h15m expects 10 measurements and its window still spans 5h15m.

use chrono::{DateTime, Duration, Utc};
use ndarray::{Axis, stack};
use std::path::Path;

use crate::ingest::MeasurementSource;
use crate::logging::{self, Component, hours_context};
use crate::model::{IntGrid, Measurement, PrecipError, SeriesArray, measurement_interval};
use crate::raster::RasterWriter;

pub struct PrecipTimeSeries<S: MeasurementSource> {
    duration: Duration,
    end_dt: DateTime<Utc>,
    start_dt: DateTime<Utc>,
    expected_count: usize,
    hours: u32,
    source: S,
    check_contiguity: bool,

    // lazily built, never invalidated
    timestamps: Option<Vec<DateTime<Utc>>>,
    series: Option<SeriesArray>,
    accumulation: Option<IntGrid>,
}

impl<S: MeasurementSource> PrecipTimeSeries<S> {
    /// Describes the series of `duration` ending at `end_dt`.
    ///
    /// # Errors
    /// `PrecipError::InvalidInput` when the duration is shorter than one
    /// measurement interval (including zero and negative durations), too
    /// long to express in whole hours, or reaching back before the earliest
    /// representable timestamp.
    pub fn new(duration: Duration, end_dt: DateTime<Utc>, source: S) -> Result<Self, PrecipError> {
        let interval_secs = measurement_interval().num_seconds();
        let expected_count = duration.num_seconds() / interval_secs;
        if expected_count <= 0 {
            return Err(PrecipError::InvalidInput(format!(
                "series duration {} is shorter than one {}-minute measurement",
                duration,
                interval_secs / 60
            )));
        }
        let hours = u32::try_from(duration.num_seconds() / 3600).map_err(|_| {
            PrecipError::InvalidInput(format!("series duration {} is out of range", duration))
        })?;
        let start_dt = end_dt.checked_sub_signed(duration).ok_or_else(|| {
            PrecipError::InvalidInput(format!(
                "series duration {} before {} is out of range",
                duration, end_dt
            ))
        })?;

        Ok(Self {
            duration,
            end_dt,
            start_dt,
            expected_count: expected_count as usize,
            hours,
            source,
            check_contiguity: false,
            timestamps: None,
            series: None,
            accumulation: None,
        })
    }

    /// Describes the series of `duration` ending with the most recent
    /// measurement the source holds.
    ///
    /// # Errors
    /// `PrecipError::EmptySource` when the source lists no measurements; any
    /// error from loading the last measurement is propagated.
    pub fn latest(duration: Duration, source: S) -> Result<Self, PrecipError> {
        let mut ids = source.list_measurements()?;
        ids.sort();
        let last = ids
            .last()
            .ok_or_else(|| PrecipError::EmptySource(source.describe()))?;
        let end_dt = source.load_measurement(last)?.end_dt;

        logging::debug(
            Component::Series,
            Some(last.as_str()),
            &format!("latest measurement ends {}", end_dt),
        );
        Self::new(duration, end_dt, source)
    }

    /// Enables strict step-contiguity validation on top of the count check.
    pub fn with_contiguity_check(mut self, enabled: bool) -> Self {
        self.check_contiguity = enabled;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn end_dt(&self) -> DateTime<Utc> {
        self.end_dt
    }

    pub fn start_dt(&self) -> DateTime<Utc> {
        self.start_dt
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    /// Duration class in whole hours (fractional hours truncate).
    pub fn duration_hours(&self) -> u32 {
        self.hours
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Window membership for a measurement ending at `measurement_end`.
    pub fn contains(&self, measurement_end: DateTime<Utc>) -> bool {
        self.start_dt < measurement_end && measurement_end <= self.end_dt
    }

    /// Raw series: one grid per measurement, stacked along axis 0 in
    /// ascending start time.
    pub fn series(&mut self) -> Result<&SeriesArray, PrecipError> {
        let series = match self.series.take() {
            Some(series) => series,
            None => self.build()?,
        };
        let series: &SeriesArray = self.series.insert(series);
        Ok(series)
    }

    /// Start times of the stacked measurements, ascending.
    pub fn timestamps(&mut self) -> Result<&[DateTime<Utc>], PrecipError> {
        self.series()?;
        Ok(self.timestamps.as_deref().unwrap_or_default())
    }

    /// Accumulated precipitation over the window: the time-axis sum halved
    /// (half-hour samples) and rounded to the nearest integer.
    pub fn accumulation(&mut self) -> Result<&IntGrid, PrecipError> {
        let accumulation = match self.accumulation.take() {
            Some(accumulation) => accumulation,
            None => accumulate(self.series()?),
        };
        let accumulation: &IntGrid = self.accumulation.insert(accumulation);
        Ok(accumulation)
    }

    /// Writes the accumulation grid through `writer`.
    pub fn save_accumulation<W: RasterWriter>(&mut self, writer: &W, path: &Path) -> Result<(), PrecipError> {
        let accumulation = self.accumulation()?;
        writer.write_raster(accumulation, path)
    }

    fn build(&mut self) -> Result<SeriesArray, PrecipError> {
        let context = hours_context(self.hours);

        let mut retained: Vec<Measurement> = Vec::with_capacity(self.expected_count);
        for id in self.source.list_measurements()? {
            let measurement = self.source.load_measurement(&id)?;
            if self.contains(measurement.end_dt) {
                retained.push(measurement);
            }
        }

        if retained.len() != self.expected_count {
            let err = PrecipError::Incomplete {
                start_dt: self.start_dt,
                end_dt: self.end_dt,
                expected: self.expected_count,
                found: retained.len(),
            };
            logging::warn(Component::Series, Some(&context), &err.to_string());
            return Err(err);
        }

        retained.sort_by_key(|m| m.start_dt);
        if self.check_contiguity {
            self.verify_contiguous(&retained)?;
        }

        let shape = retained[0].shape();
        if let Some(odd) = retained.iter().find(|m| m.shape() != shape) {
            return Err(PrecipError::ShapeMismatch {
                expected: shape,
                found: odd.shape(),
            });
        }

        let views: Vec<_> = retained.iter().map(|m| m.grid.view()).collect();
        let stacked = stack(Axis(0), &views)?;
        self.timestamps = Some(retained.iter().map(|m| m.start_dt).collect());

        logging::info(
            Component::Series,
            Some(&context),
            &format!(
                "assembled {} measurements for ({}, {}] from {}",
                retained.len(),
                self.start_dt,
                self.end_dt,
                self.source.describe()
            ),
        );
        Ok(stacked)
    }

    fn verify_contiguous(&self, sorted: &[Measurement]) -> Result<(), PrecipError> {
        let step = measurement_interval();
        let n = sorted.len() as i32;
        for (i, m) in sorted.iter().enumerate() {
            let expected = self.end_dt - step * (n - 1 - i as i32);
            if m.end_dt != expected {
                return Err(PrecipError::Discontinuous {
                    expected,
                    found: m.end_dt,
                });
            }
        }
        Ok(())
    }
}

/// Sums a stacked series over its time axis, halves it and rounds to the
/// nearest integer (ties to even), saturating at the `i16` range.
pub fn accumulate(series: &SeriesArray) -> IntGrid {
    series
        .sum_axis(Axis(0))
        .mapv(|total| (total / 2.0).round_ties_even() as i16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MemorySource;
    use crate::ingest::fixtures::{half_hour, uniform_measurements};
    use crate::model::Grid;
    use crate::raster::{GeoTiff, RasterReader};
    use ndarray::array;
    use proptest::prelude::*;
    use std::cell::Cell;

    /// Counts loads so tests can tell a cache hit from a rescan.
    struct CountingSource {
        inner: MemorySource,
        loads: Cell<usize>,
    }

    impl MeasurementSource for CountingSource {
        fn list_measurements(&self) -> Result<Vec<String>, PrecipError> {
            self.inner.list_measurements()
        }

        fn load_measurement(&self, id: &str) -> Result<Measurement, PrecipError> {
            self.loads.set(self.loads.get() + 1);
            self.inner.load_measurement(id)
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn twelve_of_ten() -> MemorySource {
        MemorySource::from_measurements("twelve", uniform_measurements(half_hour(0), 12, 10.0))
    }

    #[test]
    fn test_six_hour_series_of_twelve_accumulates_to_sixty() {
        let source = twelve_of_ten();
        let mut series = PrecipTimeSeries::new(Duration::hours(6), half_hour(12), &source).unwrap();

        assert_eq!(series.expected_count(), 12);
        assert_eq!(series.series().unwrap().dim(), (12, 1, 1));
        assert_eq!(series.accumulation().unwrap(), &array![[60i16]]);
    }

    #[test]
    fn test_eleven_measurements_is_incomplete() {
        let source =
            MemorySource::from_measurements("eleven", uniform_measurements(half_hour(1), 11, 10.0));
        let mut series = PrecipTimeSeries::new(Duration::hours(6), half_hour(12), &source).unwrap();

        match series.accumulation() {
            Err(PrecipError::Incomplete { expected, found, .. }) => {
                assert_eq!(expected, 12);
                assert_eq!(found, 11);
            }
            other => panic!("expected Incomplete, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_measurements_outside_window_are_ignored() {
        // 20 measurements available, window covers the last 12
        let source =
            MemorySource::from_measurements("twenty", uniform_measurements(half_hour(0), 20, 4.0));
        let mut series = PrecipTimeSeries::new(Duration::hours(6), half_hour(20), &source).unwrap();

        let timestamps = series.timestamps().unwrap().to_vec();
        assert_eq!(timestamps.len(), 12);
        assert_eq!(timestamps[0], half_hour(8));
        assert_eq!(timestamps[11], half_hour(19));
    }

    #[test]
    fn test_window_is_open_at_start_closed_at_end() {
        let source = twelve_of_ten();
        let series = PrecipTimeSeries::new(Duration::hours(1), half_hour(4), &source).unwrap();

        assert!(!series.contains(half_hour(2)));
        assert!(series.contains(half_hour(3)));
        assert!(series.contains(half_hour(4)));
        assert!(!series.contains(half_hour(5)));
    }

    #[test]
    fn test_non_multiple_duration_truncates_expected_count() {
        let duration = Duration::hours(5) + Duration::minutes(15);
        let source =
            MemorySource::from_measurements("ten", uniform_measurements(half_hour(0), 10, 2.0));
        let mut series = PrecipTimeSeries::new(duration, half_hour(10), &source).unwrap();

        assert_eq!(series.expected_count(), 10);
        assert_eq!(series.duration_hours(), 5);
        assert_eq!(series.start_dt(), half_hour(10) - duration);
        // window (-0:15, 5:00] holds exactly the ten measurements
        assert_eq!(series.accumulation().unwrap(), &array![[10i16]]);
    }

    #[test]
    fn test_sub_interval_duration_is_rejected() {
        let source = twelve_of_ten();
        for duration in [Duration::minutes(15), Duration::zero(), Duration::hours(-6)] {
            assert!(matches!(
                PrecipTimeSeries::new(duration, half_hour(12), &source),
                Err(PrecipError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_window_reaching_past_timestamp_range_is_rejected() {
        let source = twelve_of_ten();
        let result = PrecipTimeSeries::new(Duration::hours(3_000_000_000), half_hour(0), &source);
        assert!(matches!(result, Err(PrecipError::InvalidInput(_))));
    }

    #[test]
    fn test_series_is_cached_after_first_build() {
        let source = CountingSource {
            inner: twelve_of_ten(),
            loads: Cell::new(0),
        };
        let mut series = PrecipTimeSeries::new(Duration::hours(6), half_hour(12), &source).unwrap();

        series.series().unwrap();
        let after_first = source.loads.get();
        assert_eq!(after_first, 12);

        series.series().unwrap();
        series.accumulation().unwrap();
        series.timestamps().unwrap();
        assert_eq!(source.loads.get(), after_first);
    }

    #[test]
    fn test_stacking_orders_by_start_time() {
        let mut source = MemorySource::new("shuffled");
        // ids sort in the opposite order to the intervals they hold
        source.insert("a", Measurement::starting_at(half_hour(1), array![[3.0f32]]));
        source.insert("b", Measurement::starting_at(half_hour(0), array![[1.0f32]]));
        let mut series = PrecipTimeSeries::new(Duration::hours(1), half_hour(2), &source).unwrap();

        let stacked = series.series().unwrap();
        assert_eq!(stacked[[0, 0, 0]], 1.0);
        assert_eq!(stacked[[1, 0, 0]], 3.0);
        assert_eq!(series.timestamps().unwrap(), &[half_hour(0), half_hour(1)]);
    }

    #[test]
    fn test_rounding_is_half_to_even() {
        for (value, expected) in [(5.0f32, 2i16), (7.0, 4), (3.0, 2), (4.4, 2)] {
            let source =
                MemorySource::from_measurements("one", uniform_measurements(half_hour(0), 1, value));
            let mut series =
                PrecipTimeSeries::new(Duration::minutes(30), half_hour(1), &source).unwrap();
            assert_eq!(series.accumulation().unwrap()[[0, 0]], expected, "value {}", value);
        }
    }

    #[test]
    fn test_accumulation_saturates_at_i16_range() {
        let stacked = SeriesArray::from_elem((2, 1, 1), 60_000.0);
        assert_eq!(accumulate(&stacked)[[0, 0]], i16::MAX);
    }

    #[test]
    fn test_duplicate_timestamps_pass_count_check_only() {
        let mut source = MemorySource::new("dupes");
        source.insert("a", Measurement::starting_at(half_hour(0), array![[1.0f32]]));
        source.insert("b", Measurement::starting_at(half_hour(0), array![[1.0f32]]));

        let mut lenient = PrecipTimeSeries::new(Duration::hours(1), half_hour(2), &source).unwrap();
        assert!(lenient.series().is_ok());

        let mut strict = PrecipTimeSeries::new(Duration::hours(1), half_hour(2), &source)
            .unwrap()
            .with_contiguity_check(true);
        assert!(matches!(strict.series(), Err(PrecipError::Discontinuous { .. })));
    }

    #[test]
    fn test_contiguous_series_passes_strict_check() {
        let source = twelve_of_ten();
        let mut strict = PrecipTimeSeries::new(Duration::hours(6), half_hour(12), &source)
            .unwrap()
            .with_contiguity_check(true);
        assert!(strict.series().is_ok());
    }

    #[test]
    fn test_mismatched_grid_shapes_are_rejected() {
        let mut source = MemorySource::new("shapes");
        source.push(Measurement::starting_at(half_hour(0), Grid::zeros((2, 2))));
        source.push(Measurement::starting_at(half_hour(1), Grid::zeros((2, 3))));
        let mut series = PrecipTimeSeries::new(Duration::hours(1), half_hour(2), &source).unwrap();

        assert!(matches!(series.series(), Err(PrecipError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_latest_ends_at_last_measurement() {
        let source =
            MemorySource::from_measurements("twenty", uniform_measurements(half_hour(0), 20, 1.0));
        let mut series = PrecipTimeSeries::latest(Duration::hours(3), &source).unwrap();

        assert_eq!(series.end_dt(), half_hour(20));
        assert_eq!(series.start_dt(), half_hour(14));
        assert_eq!(series.accumulation().unwrap(), &array![[3i16]]);
    }

    #[test]
    fn test_latest_on_empty_source_fails() {
        let source = MemorySource::new("empty");
        assert!(matches!(
            PrecipTimeSeries::latest(Duration::hours(6), &source),
            Err(PrecipError::EmptySource(_))
        ));
    }

    #[test]
    fn test_accumulation_writes_through_raster_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accum.tif");
        let source = twelve_of_ten();
        let mut series = PrecipTimeSeries::new(Duration::hours(6), half_hour(12), &source).unwrap();

        series.save_accumulation(&GeoTiff::new(), &path).unwrap();

        assert_eq!(GeoTiff::new().read_int_raster(&path).unwrap(), array![[60i16]]);
    }

    proptest! {
        #[test]
        fn prop_uniform_series_accumulates_to_half_the_total(
            count in 1usize..=48,
            value in 0u16..400,
        ) {
            let source = MemorySource::from_measurements(
                "uniform",
                uniform_measurements(half_hour(0), count, f32::from(value)),
            );
            let duration = Duration::minutes(30 * count as i64);
            let mut series =
                PrecipTimeSeries::new(duration, half_hour(count as i64), &source).unwrap();

            let total = count as u32 * u32::from(value);
            let expected = if total % 4 == 1 { total / 2 } else { total.div_ceil(2) };
            prop_assert_eq!(series.accumulation().unwrap()[[0, 0]], expected as i16);
        }
    }
}
