/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Sindri Logging Module
//!
//! A `log`-facade logger shared by the Sindri crates.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sindri_utils::logging::{self, LogFormat};
//! use sindri_utils::logging::prelude::*;
//!
//! logging::init("info", LogFormat::Text)?;
//! info!("repository ready");
//!
//! // Raise verbosity at runtime, e.g. after a config reload
//! logging::update_log_level("debug");
//! ```
//!
//! Levels are "off", "error", "warn", "info", "debug" and "trace". Unknown
//! strings fall back to "info". The level and output format are held in
//! atomics, so they can be switched from any thread while others log.

use log::{LevelFilter, Metadata, Record, SetLoggerError};
use once_cell::sync::OnceCell;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

static LOGGER: SindriLogger = SindriLogger;
static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(3);
static JSON_FORMAT: AtomicBool = AtomicBool::new(false);
static INIT: OnceCell<()> = OnceCell::new();

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `2025-01-01 12:00:00 - INFO [module]: message`
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Unknown log format '{}'", other)),
        }
    }
}

/// Logger writing to stderr in the configured format
pub struct SindriLogger;

impl log::Log for SindriLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= current_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if JSON_FORMAT.load(Ordering::Relaxed) {
            let entry = serde_json::json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "level": record.level().to_string().to_lowercase(),
                "target": record.target(),
                "message": record.args().to_string(),
                "module": record.module_path(),
                "line": record.line()
            });
            eprintln!("{}", entry);
        } else {
            eprintln!(
                "{} - {} [{}]: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Installs the logger (once per process) and applies level and format.
///
/// Calling it again only changes level and format.
///
/// # Arguments
/// * `level` - log level string, e.g. "debug"
/// * `format` - output format
pub fn init(level: &str, format: LogFormat) -> Result<(), SetLoggerError> {
    INIT.get_or_try_init(|| log::set_logger(&LOGGER))?;

    JSON_FORMAT.store(format == LogFormat::Json, Ordering::Relaxed);
    update_log_level(level);
    Ok(())
}

/// Initializes the logger from the `log` section of the settings.
pub fn init_from_settings(log: &crate::config::Log) -> Result<(), SetLoggerError> {
    let format = log.format.parse().unwrap_or(LogFormat::Text);
    init(&log.level, format)
}

/// Updates the current log level and returns the level now in effect.
pub fn update_log_level(level: &str) -> LevelFilter {
    let filter = str_to_level_filter(level);
    CURRENT_LEVEL.store(filter_to_u8(filter), Ordering::Relaxed);
    log::set_max_level(filter);
    filter
}

/// The level currently in effect.
pub fn current_level() -> LevelFilter {
    u8_to_filter(CURRENT_LEVEL.load(Ordering::Relaxed))
}

pub fn str_to_level_filter(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Info)
}

fn filter_to_u8(filter: LevelFilter) -> u8 {
    match filter {
        LevelFilter::Off => 0,
        LevelFilter::Error => 1,
        LevelFilter::Warn => 2,
        LevelFilter::Info => 3,
        LevelFilter::Debug => 4,
        LevelFilter::Trace => 5,
    }
}

fn u8_to_filter(v: u8) -> LevelFilter {
    match v {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub mod prelude {
    pub use log::{debug, error, info, trace, warn};
}
