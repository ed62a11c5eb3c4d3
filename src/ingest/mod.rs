/// Measurement discovery and loading.
///
/// The series builder only depends on `MeasurementSource`; each concrete
/// source lives in its own file under ingest/.
///
/// Submodules:
/// - `imerg`  — NASA GPM IMERG half-hourly files in a directory
/// - `memory` — measurements already held in memory
/// - `fixtures` (test only) — synthetic grids and filenames

pub mod imerg;
pub mod memory;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::model::{Measurement, PrecipError};

pub use imerg::ImergDirectory;
pub use memory::MemorySource;

/// Provider of half-hourly measurements.
pub trait MeasurementSource {
    /// Identifiers of every available measurement, sorted so that the
    /// order is chronological.
    fn list_measurements(&self) -> Result<Vec<String>, PrecipError>;

    /// Loads one measurement by identifier. A malformed measurement is an
    /// error, never skipped.
    fn load_measurement(&self, id: &str) -> Result<Measurement, PrecipError>;

    /// Human-readable name of the source, for logs and error messages.
    fn describe(&self) -> String;
}

impl<T: MeasurementSource + ?Sized> MeasurementSource for &T {
    fn list_measurements(&self) -> Result<Vec<String>, PrecipError> {
        (**self).list_measurements()
    }

    fn load_measurement(&self, id: &str) -> Result<Measurement, PrecipError> {
        (**self).load_measurement(id)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
