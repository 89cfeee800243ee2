//! Bootstrap configuration loading
//!
//! Resolution order for every field:
//! 1. Command-line argument (highest priority; clap also folds in its env vars)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: defaults apply and the returned
//! [`ConfigSource`] carries the warning, logged once tracing is installed.
//! Runtime settings (e.g. the review chat) live in the database `settings` table.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default HTTP port of the attendance service
pub const DEFAULT_PORT: u16 = 5730;

/// Geofence radius used when a speaker does not supply one
pub const DEFAULT_GEOFENCE_RADIUS_M: f64 = 150.0;

/// Bootstrap configuration as read from the TOML file
///
/// Every field is optional; absent fields fall through to compiled defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP server port
    #[serde(default)]
    pub port: Option<u16>,

    /// Address the HTTP server binds to
    #[serde(default)]
    pub bind_address: Option<String>,

    /// Principals that bypass every stored-role check
    #[serde(default)]
    pub master_admin_ids: Vec<i64>,

    /// Base URL of the mini-application
    #[serde(default)]
    pub webapp_url: Option<String>,

    /// Radius applied by `speaker_set_geo` when the payload carries none
    #[serde(default)]
    pub default_geofence_radius_m: Option<f64>,

    /// Shared token required on `/api/*` routes (None disables the check)
    #[serde(default)]
    pub api_token: Option<String>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values already resolved by the command-line parser
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub port: Option<u16>,
}

/// Fully resolved service configuration
///
/// Constructed once in `main` and handed to component constructors.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub database_path: PathBuf,
    pub port: u16,
    pub bind_address: String,
    pub master_admin_ids: HashSet<i64>,
    pub webapp_url: Option<String>,
    pub default_geofence_radius_m: f64,
    pub api_token: Option<String>,
    pub log_level: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("attendance.db"),
            port: DEFAULT_PORT,
            bind_address: "127.0.0.1".to_string(),
            master_admin_ids: HashSet::new(),
            webapp_url: None,
            default_geofence_radius_m: DEFAULT_GEOFENCE_RADIUS_M,
            api_token: None,
            log_level: default_log_level(),
        }
    }
}

impl BotConfig {
    /// Resolve configuration from CLI overrides, process environment and TOML file
    ///
    /// Runs before logging is configured, so nothing is logged here; call
    /// [`ConfigSource::log`] on the returned source afterwards.
    pub fn resolve(overrides: &CliOverrides) -> Result<(Self, ConfigSource)> {
        let (toml_config, source) = load_toml_layer(overrides.config_path.as_deref(), default_config_path())?;
        let config = Self::from_sources(overrides, |key| std::env::var(key).ok(), toml_config)?;
        Ok((config, source))
    }

    /// Merge the individual sources; `env` is injected so tests stay hermetic
    pub fn from_sources<F>(overrides: &CliOverrides, env: F, toml_config: TomlConfig) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env_nonempty = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path = overrides
            .database_path
            .clone()
            .or_else(|| env_nonempty("ATTENDANCE_DB_PATH").map(PathBuf::from))
            .or(toml_config.database_path)
            .unwrap_or(defaults.database_path);

        let port = match overrides.port {
            Some(port) => port,
            None => match env_nonempty("ATTENDANCE_PORT") {
                Some(raw) => raw
                    .parse::<u16>()
                    .map_err(|e| Error::Config(format!("Invalid ATTENDANCE_PORT '{}': {}", raw, e)))?,
                None => toml_config.port.unwrap_or(defaults.port),
            },
        };
        if port == 0 {
            return Err(Error::Config("Port must be non-zero".to_string()));
        }

        let mut master_admin_ids: HashSet<i64> = toml_config.master_admin_ids.into_iter().collect();
        if let Some(raw) = env_nonempty("MASTER_ADMIN_IDS") {
            master_admin_ids.extend(parse_master_admin_ids(&raw));
        }

        let webapp_url = env_nonempty("WEBAPP_URL").or_else(|| non_blank(toml_config.webapp_url));

        let default_geofence_radius_m = toml_config
            .default_geofence_radius_m
            .unwrap_or(defaults.default_geofence_radius_m);
        if !default_geofence_radius_m.is_finite() || default_geofence_radius_m <= 0.0 {
            return Err(Error::Config(format!(
                "default_geofence_radius_m must be a positive number, got {}",
                default_geofence_radius_m
            )));
        }

        let api_token = env_nonempty("ATTENDANCE_API_TOKEN").or_else(|| non_blank(toml_config.api_token));

        Ok(Self {
            database_path,
            port,
            bind_address: non_blank(toml_config.bind_address).unwrap_or(defaults.bind_address),
            master_admin_ids,
            webapp_url,
            default_geofence_radius_m,
            api_token,
            log_level: toml_config.logging.level,
        })
    }
}

/// Parse a comma- or semicolon-separated list of principal ids
///
/// Entries that are not plain decimal digits are ignored.
pub fn parse_master_admin_ids(raw: &str) -> HashSet<i64> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|part| part.parse::<i64>().ok())
        .collect()
}

/// Where the TOML layer of the configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded from this file
    File(PathBuf),
    /// Nothing at the default location; defaults apply
    MissingDefault(PathBuf),
    /// No platform config directory; defaults apply
    NoConfigDir,
}

impl ConfigSource {
    /// Warning to report, if the TOML layer fell back to defaults
    pub fn warning(&self) -> Option<String> {
        match self {
            ConfigSource::File(_) => None,
            ConfigSource::MissingDefault(path) => {
                Some(format!("No config file found at {}, using defaults", path.display()))
            }
            ConfigSource::NoConfigDir => Some("Could not determine config directory, using defaults".to_string()),
        }
    }

    pub fn log(&self) {
        match (self, self.warning()) {
            (_, Some(warning)) => warn!("{}", warning),
            (ConfigSource::File(path), None) => info!("Loaded configuration from {}", path.display()),
            _ => {}
        }
    }
}

/// Load the TOML layer
///
/// An explicit path must exist. Otherwise `fallback` is used when present and
/// defaults apply when it is not.
pub fn load_toml_layer(explicit: Option<&Path>, fallback: Option<PathBuf>) -> Result<(TomlConfig, ConfigSource)> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found: {}", path.display())));
        }
        return Ok((load_toml_config(path)?, ConfigSource::File(path.to_path_buf())));
    }

    match fallback {
        Some(path) if path.exists() => {
            let toml_config = load_toml_config(&path)?;
            Ok((toml_config, ConfigSource::File(path)))
        }
        Some(path) => Ok((TomlConfig::default(), ConfigSource::MissingDefault(path))),
        None => Ok((TomlConfig::default(), ConfigSource::NoConfigDir)),
    }
}

/// Read and parse a TOML bootstrap file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Default configuration file path for the platform
///
/// `~/.config/attendance/config.toml` first, then `/etc/attendance/config.toml`.
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("attendance").join("config.toml"));
    if let Some(path) = &user_config {
        if path.exists() {
            return user_config;
        }
    }

    let system_config = PathBuf::from("/etc/attendance/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    user_config
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
