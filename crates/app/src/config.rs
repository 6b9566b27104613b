//! Runtime configuration for the CLI.
//!
//! Values come from the environment (with a local `.env` for development);
//! command-line flags are applied on top by `main`.

use std::path::PathBuf;
use std::str::FromStr;

use coursetime_core::settings::{ActivitySettings, SettingsError, TimerSettings};

pub const DB_URL_VAR: &str = "COURSETIME_DB_URL";
pub const CATALOG_VAR: &str = "COURSETIME_CATALOG";
pub const INACTIVITY_VAR: &str = "COURSETIME_INACTIVITY_SECS";
pub const WARNING_VAR: &str = "COURSETIME_WARNING_SECS";
pub const FLUSH_VAR: &str = "COURSETIME_FLUSH_SECS";
pub const DEFAULT_DURATION_VAR: &str = "COURSETIME_DEFAULT_DURATION_SECS";
pub const LOG_VAR: &str = "RUST_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {raw}")]
    InvalidValue { var: &'static str, raw: String },
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub db_url: String,
    pub catalog_path: PathBuf,
    pub log_filter: String,
    pub inactivity_timeout_secs: u32,
    pub warning_window_secs: u32,
    pub flush_interval_secs: u32,
    pub default_unit_duration_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let activity = ActivitySettings::default();
        let timer = TimerSettings::default();
        Self {
            db_url: "sqlite://coursetime.sqlite3".into(),
            catalog_path: PathBuf::from("catalog.json"),
            log_filter: "info".into(),
            inactivity_timeout_secs: activity.inactivity_timeout_secs(),
            warning_window_secs: activity.warning_window_secs(),
            flush_interval_secs: timer.flush_interval_secs(),
            default_unit_duration_secs: timer.default_unit_duration_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a variable that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for absent variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a variable that does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        Ok(Self {
            db_url: non_empty(DB_URL_VAR).unwrap_or(defaults.db_url),
            catalog_path: non_empty(CATALOG_VAR).map_or(defaults.catalog_path, PathBuf::from),
            log_filter: non_empty(LOG_VAR).unwrap_or(defaults.log_filter),
            inactivity_timeout_secs: parse_var(&non_empty, INACTIVITY_VAR)?
                .unwrap_or(defaults.inactivity_timeout_secs),
            warning_window_secs: parse_var(&non_empty, WARNING_VAR)?
                .unwrap_or(defaults.warning_window_secs),
            flush_interval_secs: parse_var(&non_empty, FLUSH_VAR)?
                .unwrap_or(defaults.flush_interval_secs),
            default_unit_duration_secs: parse_var(&non_empty, DEFAULT_DURATION_VAR)?
                .unwrap_or(defaults.default_unit_duration_secs),
        })
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Settings` when the timeout and warning window are inconsistent.
    pub fn activity_settings(&self) -> Result<ActivitySettings, ConfigError> {
        Ok(ActivitySettings::new(
            self.inactivity_timeout_secs,
            self.warning_window_secs,
        )?)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Settings` for a zero flush interval or default duration.
    pub fn timer_settings(&self) -> Result<TimerSettings, ConfigError> {
        Ok(TimerSettings::new(
            TimerSettings::default().tick_interval_secs(),
            self.flush_interval_secs,
            self.default_unit_duration_secs,
        )?)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { var, raw })
        })
        .transpose()
}
