//! GPM precipitation alert runner
//!
//! One pass over the IMERG half-hourly archive:
//! 1. Loads service configuration and the threshold table
//! 2. For every requested duration class, assembles the window ending at the
//!    latest measurement (or at `--end`), checks completeness, accumulates
//! 3. Classifies every cell against the low/medium/high threshold grids
//! 4. Writes `gpm_alert_NNNh.tif` (and optionally `gpm_accum_NNNh.tif`)
//!
//! Duration classes are independent and run on a small worker pool.
//!
//! Usage:
//!   cargo run --release                                  # classes from gpm_alert.toml
//!   cargo run --release -- --hours 3 --hours 6           # explicit classes
//!   cargo run --release -- --end 2017-01-01T06:00:00Z --summary run.json
//!
//! Environment:
//!   GPM_ALERT_CONFIG - service config path (default gpm_alert.toml)
//!   GPM_DATA_DIR     - overrides data_dir
//!   GPM_OUTPUT_DIR   - overrides output_dir

use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use threadpool::ThreadPool;

use gpm_alert::alert::{AlertDetector, AlertSummary, whole_hours};
use gpm_alert::config::{ServiceConfig, ThresholdTable};
use gpm_alert::ingest::ImergDirectory;
use gpm_alert::logging::{self, Component, LogLevel, hours_context};
use gpm_alert::model::PrecipError;
use gpm_alert::raster::GeoTiff;
use gpm_alert::series::PrecipTimeSeries;

const MAX_WORKERS: usize = 4;

#[derive(Parser, Debug)]
#[command(name = "gpm_alert", about = "Gridded precipitation alerts from GPM IMERG", version)]
struct Cli {
    /// Service configuration file (otherwise GPM_ALERT_CONFIG / gpm_alert.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Duration class in whole hours; repeat for several classes
    #[arg(long = "hours")]
    hours: Vec<f64>,

    /// Window end (RFC 3339); defaults to the end of the latest measurement
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// Also write the accumulation raster for each class
    #[arg(long)]
    save_accumulation: bool,

    /// Reject windows whose measurements are not consecutive half hours
    #[arg(long)]
    strict: bool,

    /// Write a JSON run summary to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

/// Outcome of one duration class, as written to the run summary.
#[derive(Debug, Serialize)]
struct ClassOutcome {
    hours: u32,
    alert_file: Option<PathBuf>,
    accumulation_file: Option<PathBuf>,
    summary: Option<AlertSummary>,
    error: Option<String>,
}

impl ClassOutcome {
    fn failed(hours: u32, error: String) -> Self {
        Self {
            hours,
            alert_file: None,
            accumulation_file: None,
            summary: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    generated_at: DateTime<Utc>,
    classes: Vec<ClassOutcome>,
}

struct ClassJob {
    hours: u32,
    end: Option<DateTime<Utc>>,
    save_accumulation: bool,
    strict: bool,
}

fn main() {
    let cli = Cli::parse();

    println!("🛰  GPM Precipitation Alerts");
    println!("===========================\n");

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ Configuration failed: {}\n", e);
            std::process::exit(1);
        }
    };
    logging::init_logger(cli.log_level, config.log_file.as_deref(), false);

    let table = match ThresholdTable::load(&config.thresholds_file) {
        Ok(table) => table,
        Err(e) => {
            logging::error(Component::System, None, &e.to_string());
            eprintln!("\n❌ Threshold table failed: {}\n", e);
            std::process::exit(1);
        }
    };
    if table.is_empty() {
        eprintln!(
            "\n❌ Threshold table {} has no \"<hours> Hours\" sections\n",
            config.thresholds_file.display()
        );
        std::process::exit(1);
    }
    println!(
        "📊 Threshold table {} ({} duration classes)",
        config.thresholds_file.display(),
        table.hours().len()
    );

    let classes = match requested_classes(&cli, &config) {
        Ok(classes) => classes,
        Err(e) => {
            eprintln!("\n❌ {}\n", e);
            std::process::exit(1);
        }
    };
    println!("📂 Data:   {}", config.data_dir.display());
    println!("📁 Output: {}\n", config.output_dir.display());

    let outcomes = run_classes(&cli, Arc::new(config), Arc::new(table), &classes);

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    let successful = outcomes.len() - failed;

    println!();
    for outcome in &outcomes {
        match (&outcome.summary, &outcome.error) {
            (Some(summary), None) => println!(
                "   ✓ {:>3}h - {} cells alerting (L1 {} / L2 {} / L3 {}), max {}",
                outcome.hours,
                summary.alerting_cells(),
                summary.counts[1],
                summary.counts[2],
                summary.counts[3],
                summary.max_accumulation
            ),
            (_, Some(err)) => eprintln!("   ✗ {:>3}h - {}", outcome.hours, err),
            _ => {}
        }
    }

    if let Some(path) = &cli.summary {
        let run = RunSummary {
            generated_at: Utc::now(),
            classes: outcomes,
        };
        match write_summary(path, &run) {
            Ok(()) => println!("\n📝 Summary written to {}", path.display()),
            Err(e) => {
                eprintln!("\n❌ {}", e);
                std::process::exit(1);
            }
        }
    }

    logging::log_run_summary(successful + failed, successful, failed);

    if failed > 0 {
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<ServiceConfig, PrecipError> {
    match &cli.config {
        Some(path) => {
            dotenv::dotenv().ok();
            let mut config = ServiceConfig::load(path)?;
            config.apply_overrides(
                std::env::var("GPM_DATA_DIR").ok(),
                std::env::var("GPM_OUTPUT_DIR").ok(),
            );
            Ok(config)
        }
        None => ServiceConfig::from_env(),
    }
}

fn requested_classes(cli: &Cli, config: &ServiceConfig) -> Result<Vec<u32>, PrecipError> {
    let mut classes = if cli.hours.is_empty() {
        config.durations_hours.clone()
    } else {
        cli.hours
            .iter()
            .map(|&h| whole_hours(h))
            .collect::<Result<Vec<_>, _>>()?
    };
    classes.sort_unstable();
    classes.dedup();
    if classes.is_empty() {
        return Err(PrecipError::Configuration(
            "no duration classes requested".to_string(),
        ));
    }
    Ok(classes)
}

fn run_classes(
    cli: &Cli,
    config: Arc<ServiceConfig>,
    table: Arc<ThresholdTable>,
    classes: &[u32],
) -> Vec<ClassOutcome> {
    let (end, save_accumulation, strict) = (cli.end, cli.save_accumulation, cli.strict);
    run_pooled(classes, move |hours| {
        let job = ClassJob {
            hours,
            end,
            save_accumulation,
            strict,
        };
        run_class(&job, &config, &table)
    })
}

/// Runs `job` once per class on the worker pool. A class whose worker
/// panicked still gets a failed outcome, so it is reported and counted.
fn run_pooled<F>(classes: &[u32], job: F) -> Vec<ClassOutcome>
where
    F: Fn(u32) -> ClassOutcome + Send + Sync + 'static,
{
    let pool = ThreadPool::new(classes.len().clamp(1, MAX_WORKERS));
    let job = Arc::new(job);
    let (tx, rx) = mpsc::channel();

    for &hours in classes {
        let tx = tx.clone();
        let job = Arc::clone(&job);
        pool.execute(move || {
            let _ = tx.send(job(hours));
        });
    }
    drop(tx);

    let mut outcomes: Vec<ClassOutcome> = rx.iter().collect();
    for &hours in classes {
        if !outcomes.iter().any(|o| o.hours == hours) {
            let context = hours_context(hours);
            logging::error(Component::System, Some(&context), "worker panicked");
            outcomes.push(ClassOutcome::failed(hours, "worker panicked".to_string()));
        }
    }
    outcomes.sort_by_key(|o| o.hours);
    outcomes
}

fn run_class(job: &ClassJob, config: &ServiceConfig, table: &ThresholdTable) -> ClassOutcome {
    let context = hours_context(job.hours);
    println!("⏳ {} window...", context);

    match detect_class(job, config, table) {
        Ok((alert_file, accumulation_file, summary)) => ClassOutcome {
            hours: job.hours,
            alert_file: Some(alert_file),
            accumulation_file,
            summary: Some(summary),
            error: None,
        },
        Err(e) => {
            if e.is_data_gap() {
                logging::warn(Component::System, Some(&context), &e.to_string());
            } else {
                logging::error(Component::System, Some(&context), &e.to_string());
            }
            ClassOutcome::failed(job.hours, e.to_string())
        }
    }
}

fn detect_class(
    job: &ClassJob,
    config: &ServiceConfig,
    table: &ThresholdTable,
) -> Result<(PathBuf, Option<PathBuf>, AlertSummary), PrecipError> {
    let duration = Duration::hours(i64::from(job.hours));
    let source = ImergDirectory::new(&config.data_dir);

    let series = match job.end {
        Some(end) => PrecipTimeSeries::new(duration, end, source)?,
        None => PrecipTimeSeries::latest(duration, source)?,
    }
    .with_contiguity_check(job.strict);

    let raster = GeoTiff::with_georeference(config.georeference);
    let mut detector = AlertDetector::new(series, table, &config.adjustment_grid, raster)?;

    let alert_file = detector.save(&raster, &config.output_dir)?;
    let accumulation_file = if job.save_accumulation {
        Some(detector.save_accumulation(&raster, &config.output_dir)?)
    } else {
        None
    };
    let summary = detector.summary()?;

    logging::info(
        Component::System,
        Some(&hours_context(job.hours)),
        &format!("wrote {}", alert_file.display()),
    );
    Ok((alert_file, accumulation_file, summary))
}

fn write_summary(path: &Path, run: &RunSummary) -> Result<(), PrecipError> {
    let json = serde_json::to_string_pretty(run)
        .map_err(|e| PrecipError::InvalidInput(format!("cannot serialize run summary: {}", e)))?;
    std::fs::write(path, json).map_err(|source| PrecipError::Io {
        path: path.to_path_buf(),
        source,
    })
}
