/// Structured logging for the precipitation alert service
///
/// Provides context-rich logging tagged with the pipeline stage and an
/// optional context (duration class, file name), timestamps, and severity
/// levels. Supports console output and an optional append-only log file.
///
/// Logging never replaces error propagation: every failure logged here is
/// still returned to the caller.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Ingest,
    Series,
    Thresholds,
    Detector,
    Raster,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Ingest => write!(f, "INGEST"),
            Component::Series => write!(f, "SERIES"),
            Component::Thresholds => write!(f, "THRESH"),
            Component::Detector => write!(f, "DETECT"),
            Component::Raster => write!(f, "RASTER"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance. Nothing is emitted until `init_logger` runs.
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    fn format_entry(level: LogLevel, component: Component, context: Option<&str>, message: &str) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let context_part = context.map(|c| format!(" [{}]", c)).unwrap_or_default();
        format!("{} {} {}{}: {}", timestamp, level, component, context_part, message)
    }

    fn log(&self, level: LogLevel, component: Component, context: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let entry = Self::format_entry(level, component, context, message);
        let context_part = context.map(|c| format!(" [{}]", c)).unwrap_or_default();

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", component, context_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", component, context_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", component, context_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    let logger = Logger {
        min_level,
        log_file: log_file.map(String::from),
        console_timestamps,
    };
    if let Ok(mut guard) = LOGGER.lock() {
        *guard = Some(logger);
    }
}

fn emit(level: LogLevel, component: Component, context: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, component, context, message);
        }
    }
}

pub fn debug(component: Component, context: Option<&str>, message: &str) {
    emit(LogLevel::Debug, component, context, message);
}

pub fn info(component: Component, context: Option<&str>, message: &str) {
    emit(LogLevel::Info, component, context, message);
}

pub fn warn(component: Component, context: Option<&str>, message: &str) {
    emit(LogLevel::Warning, component, context, message);
}

pub fn error(component: Component, context: Option<&str>, message: &str) {
    emit(LogLevel::Error, component, context, message);
}

/// Context tag for a duration class, e.g. `"006h"`.
pub fn hours_context(hours: u32) -> String {
    format!("{:03}h", hours)
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log the outcome of a multi-class run
pub fn log_run_summary(total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Run complete: {}/{} duration classes successful, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info(Component::System, None, &message);
    } else if successful == 0 {
        error(Component::System, None, &message);
    } else {
        warn(Component::System, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_entry_format_includes_context() {
        let entry = Logger::format_entry(LogLevel::Info, Component::Series, Some("006h"), "assembled");
        assert!(entry.contains("INFO SERIES [006h]: assembled"));
    }

    #[test]
    fn test_hours_context_is_zero_padded() {
        assert_eq!(hours_context(6), "006h");
        assert_eq!(hours_context(120), "120h");
    }
}
