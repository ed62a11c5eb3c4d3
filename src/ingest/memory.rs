/// In-memory measurement source.
///
/// For hosts that already hold decoded grids (and for the test-suite).
/// Identifiers sort chronologically when generated by `push`.

use std::collections::BTreeMap;

use crate::model::{Measurement, PrecipError};

use super::MeasurementSource;

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    measurements: BTreeMap<String, Measurement>,
}

impl MemorySource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            measurements: BTreeMap::new(),
        }
    }

    /// Builds a source from measurements, keyed by their start time.
    pub fn from_measurements<I: IntoIterator<Item = Measurement>>(name: &str, measurements: I) -> Self {
        let mut source = Self::new(name);
        for m in measurements {
            source.push(m);
        }
        source
    }

    /// Adds a measurement under an identifier derived from its start time,
    /// returning that identifier. A measurement with the same start time
    /// replaces the previous one.
    pub fn push(&mut self, measurement: Measurement) -> String {
        let id = measurement.start_dt.format("%Y%m%d-S%H%M%S").to_string();
        self.measurements.insert(id.clone(), measurement);
        id
    }

    /// Adds a measurement under an explicit identifier.
    pub fn insert(&mut self, id: &str, measurement: Measurement) {
        self.measurements.insert(id.to_string(), measurement);
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

impl MeasurementSource for MemorySource {
    fn list_measurements(&self) -> Result<Vec<String>, PrecipError> {
        Ok(self.measurements.keys().cloned().collect())
    }

    fn load_measurement(&self, id: &str) -> Result<Measurement, PrecipError> {
        self.measurements.get(id).cloned().ok_or_else(|| PrecipError::Format {
            file: id.to_string(),
            reason: format!("no such measurement in {}", self.name),
        })
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}
