/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Sindri Config Module
//! This module provides the configuration framework shared by the Sindri crates.
//!
//! # Variable Naming Convention
//!
//! - Struct fields use snake_case (e.g., `repository`, `interval_ms`)
//! - Environment variables use SCREAMING_SNAKE_CASE and are prefixed with "SINDRI__"
//!   (e.g., `SINDRI__SCHEDULER__ROLLOUT__INTERVAL_MS`)
//! - Configuration file keys use snake_case (e.g., `scheduler.rollout.interval_ms`)
//!
//! # Configuration Overriding
//!
//! Values are loaded in the following order (later sources take precedence):
//!
//! 1. Default values from the embedded `default.toml` file
//! 2. Values from an optional external configuration file (if provided)
//! 3. Environment variables
//!
//! # Available Environment Variables
//!
//! - `SINDRI__LOG__LEVEL`: log level ("trace", "debug", "info", "warn", "error"). Default: "info"
//! - `SINDRI__LOG__FORMAT`: "text" or "json". Default: "text"
//! - `SINDRI__REPOSITORY__MULTI_ASSIGNMENTS_ENABLED`: allow several active actions per target. Default: false
//! - `SINDRI__REPOSITORY__CONFIRMATION_FLOW_ENABLED`: create actions waiting for confirmation when requested. Default: false
//! - `SINDRI__REPOSITORY__ROLLOUT_APPROVAL_ENABLED`: gate new rollouts behind approval. Default: false
//! - `SINDRI__REPOSITORY__MAX_ROLLOUT_GROUPS`: upper bound for groups per rollout. Default: 500
//! - `SINDRI__REPOSITORY__MAX_ACTIONS_PER_QUERY_TICK`: auto-assign batch per filter query and tick. Default: 1000
//! - `SINDRI__REPOSITORY__SCOPE_CACHE_CAPACITY`: compiled permission scopes kept in memory. Default: 1024
//! - `SINDRI__SCHEDULER__ROLLOUT__ENABLED` / `__INTERVAL_MS` / `__LOCK_TTL_MS`
//! - `SINDRI__SCHEDULER__AUTO_ASSIGN__ENABLED` / `__INTERVAL_MS` / `__LOCK_TTL_MS`

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::sync::{Arc, RwLock};

// Include the default settings file as a string constant
const DEFAULT_SETTINGS: &str = include_str!("../default.toml");

/// Represents the main settings structure for the application
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Logging configuration
    pub log: Log,
    /// Repository behaviour toggles and limits
    pub repository: Repository,
    /// Periodic scheduler configuration
    pub scheduler: Scheduler,
}

/// Represents the logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,
    /// Log format: "text" for human-readable, "json" for structured JSON
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Repository behaviour toggles and limits
#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    /// When enabled a target may hold several active actions, ordered by weight
    pub multi_assignments_enabled: bool,
    /// When enabled, assignments requesting confirmation wait in WAIT_FOR_CONFIRMATION
    pub confirmation_flow_enabled: bool,
    /// When enabled, rollouts created without APPROVE_ROLLOUT wait for approval
    pub rollout_approval_enabled: bool,
    /// Maximum number of groups a single rollout may be split into
    pub max_rollout_groups: u32,
    /// Maximum number of targets auto-assigned per filter query in one tick
    pub max_actions_per_query_tick: usize,
    /// Number of compiled permission scopes kept in the scope cache
    pub scope_cache_capacity: u64,
}

impl Default for Repository {
    fn default() -> Self {
        Self {
            multi_assignments_enabled: false,
            confirmation_flow_enabled: false,
            rollout_approval_enabled: false,
            max_rollout_groups: 500,
            max_actions_per_query_tick: 1000,
            scope_cache_capacity: 1024,
        }
    }
}

/// Scheduler configuration, one entry per periodic task
#[derive(Debug, Deserialize, Clone)]
pub struct Scheduler {
    pub rollout: SchedulerTask,
    pub auto_assign: SchedulerTask,
}

/// Settings of one periodic, lock-guarded task
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SchedulerTask {
    /// Whether the task is started at all
    pub enabled: bool,
    /// Delay between two ticks in milliseconds
    pub interval_ms: u64,
    /// Lease duration of the per-tenant lock in milliseconds
    pub lock_ttl_ms: u64,
}

impl Default for SchedulerTask {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2000,
            lock_ttl_ms: 30_000,
        }
    }
}

impl Settings {
    /// Creates a new `Settings` instance
    ///
    /// # Arguments
    ///
    /// * `file` - An optional path to a configuration file
    ///
    /// # Returns
    ///
    /// Returns a `Result` containing the `Settings` instance or a `ConfigError`
    pub fn new(file: Option<String>) -> Result<Self, ConfigError> {
        let mut s = Config::builder()
            .add_source(File::from_str(DEFAULT_SETTINGS, config::FileFormat::Toml));

        s = match file {
            Some(x) => s.add_source(File::with_name(x.as_str())),
            None => s,
        };

        // Environment variables prefixed with "SINDRI" and using "__" as a separator
        s = s.add_source(Environment::with_prefix("SINDRI").separator("__"));

        s.build()?.try_deserialize()
    }
}

/// Configuration values that can be hot-reloaded at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub log_level: String,
    /// Rollout scheduler tick interval in milliseconds
    pub rollout_interval_ms: u64,
    /// Auto-assign scheduler tick interval in milliseconds
    pub auto_assign_interval_ms: u64,
}

impl DynamicConfig {
    /// Create DynamicConfig from Settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            log_level: settings.log.level.clone(),
            rollout_interval_ms: settings.scheduler.rollout.interval_ms,
            auto_assign_interval_ms: settings.scheduler.auto_assign.interval_ms,
        }
    }

    fn diff(&self, other: &DynamicConfig) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        if self.log_level != other.log_level {
            changes.push(ConfigChange::new("log.level", &self.log_level, &other.log_level));
        }
        if self.rollout_interval_ms != other.rollout_interval_ms {
            changes.push(ConfigChange::new(
                "scheduler.rollout.interval_ms",
                self.rollout_interval_ms,
                other.rollout_interval_ms,
            ));
        }
        if self.auto_assign_interval_ms != other.auto_assign_interval_ms {
            changes.push(ConfigChange::new(
                "scheduler.auto_assign.interval_ms",
                self.auto_assign_interval_ms,
                other.auto_assign_interval_ms,
            ));
        }
        changes
    }
}

/// Represents a configuration change detected during reload
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    /// The configuration key that changed
    pub key: String,
    /// The old value (as string for display)
    pub old_value: String,
    /// The new value (as string for display)
    pub new_value: String,
}

impl ConfigChange {
    fn new(key: &str, old_value: impl ToString, new_value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
        }
    }
}

/// Configuration wrapper that separates static (restart-required) settings
/// from dynamic (hot-reloadable) settings.
///
/// # Example
///
/// ```rust,ignore
/// use sindri_utils::config::ReloadableConfig;
///
/// let config = ReloadableConfig::new(None)?;
/// let interval = config.rollout_interval_ms();
///
/// for change in config.reload()? {
///     println!("Changed {}: {} -> {}", change.key, change.old_value, change.new_value);
/// }
/// ```
#[derive(Clone)]
pub struct ReloadableConfig {
    static_config: Settings,
    dynamic: Arc<RwLock<DynamicConfig>>,
    config_file: Option<String>,
}

impl ReloadableConfig {
    /// Creates a new ReloadableConfig from the configuration sources
    pub fn new(file: Option<String>) -> Result<Self, ConfigError> {
        let settings = Settings::new(file.clone())?;
        Ok(Self::from_settings(settings, file))
    }

    /// Creates a ReloadableConfig from an existing Settings instance
    ///
    /// # Arguments
    ///
    /// * `settings` - The Settings instance to wrap
    /// * `config_file` - An optional path to the config file for future reloads
    pub fn from_settings(settings: Settings, config_file: Option<String>) -> Self {
        let dynamic = DynamicConfig::from_settings(&settings);

        Self {
            static_config: settings,
            dynamic: Arc::new(RwLock::new(dynamic)),
            config_file,
        }
    }

    /// Settings that require a restart to change
    pub fn static_config(&self) -> &Settings {
        &self.static_config
    }

    /// Reload dynamic configuration from sources (file + environment)
    ///
    /// Returns the list of configuration changes that were applied.
    pub fn reload(&self) -> Result<Vec<ConfigChange>, ConfigError> {
        let new_settings = Settings::new(self.config_file.clone())?;
        self.apply(DynamicConfig::from_settings(&new_settings))
    }

    /// Replaces the dynamic values and reports what changed.
    pub fn apply(&self, new_dynamic: DynamicConfig) -> Result<Vec<ConfigChange>, ConfigError> {
        let mut dynamic = self
            .dynamic
            .write()
            .map_err(|e| ConfigError::Message(format!("Failed to acquire write lock: {}", e)))?;

        let changes = dynamic.diff(&new_dynamic);
        *dynamic = new_dynamic;

        Ok(changes)
    }

    // ============================================
    // Convenience accessors for dynamic config
    // ============================================

    /// Get current log level
    pub fn log_level(&self) -> String {
        self.dynamic
            .read()
            .map(|d| d.log_level.clone())
            .unwrap_or_else(|_| "info".to_string())
    }

    /// Get the rollout scheduler interval in milliseconds
    pub fn rollout_interval_ms(&self) -> u64 {
        self.dynamic
            .read()
            .map(|d| d.rollout_interval_ms)
            .unwrap_or(self.static_config.scheduler.rollout.interval_ms)
    }

    /// Get the auto-assign scheduler interval in milliseconds
    pub fn auto_assign_interval_ms(&self) -> u64 {
        self.dynamic
            .read()
            .map(|d| d.auto_assign_interval_ms)
            .unwrap_or(self.static_config.scheduler.auto_assign.interval_ms)
    }

    /// Get a snapshot of all dynamic config values
    pub fn dynamic_snapshot(&self) -> Option<DynamicConfig> {
        self.dynamic.read().ok().map(|d| d.clone())
    }
}
