//! Configuration loading and root folder resolution
//!
//! Runtime settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Pricing and eligibility constants are NOT part of this file: they live in
//! the service database (catalog store) and have no compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Name of the SQLite database file inside the root folder
pub const DATABASE_FILE_NAME: &str = "tqe.db";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "TQE_CONFIG";

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the database
    pub root_folder: Option<String>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
    pub threshold: ThresholdConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5740,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Timers and channel sizes for the quote workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Countdown before an unanalysed quote is escalated to human review
    pub processing_timeout_secs: u64,
    /// Pull-model re-check interval for pipeline status
    pub pipeline_poll_interval_secs: u64,
    /// How often quotes past their expiry are swept
    pub expiry_sweep_interval_secs: u64,
    /// Broadcast capacity of the quote EventBus
    pub event_bus_capacity: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            processing_timeout_secs: 45,
            pipeline_poll_interval_secs: 5,
            expiry_sweep_interval_secs: 300,
            event_bus_capacity: 256,
        }
    }
}

impl WorkflowConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn pipeline_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline_poll_interval_secs.max(1))
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs.max(1))
    }
}

/// Threshold-check service client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Endpoint URL; when unset every quote passes the threshold check
    pub url: Option<String>,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Attempts before failing open
    pub max_attempts: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 3000,
            max_attempts: 2,
        }
    }
}

impl ThresholdConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Load the TOML config file
///
/// A missing file is not an error: defaults are returned and a warning logged.
/// A file that exists but does not parse IS an error.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match find_config_file() {
            Some(p) => p,
            None => {
                warn!("No config file found, using compiled defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    if !path.exists() {
        warn!("Config file {} does not exist, using compiled defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Locate the config file for the platform
///
/// `TQE_CONFIG` first, then `~/.config/tqe/config.toml`, then `/etc/tqe/config.toml`.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("tqe").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/tqe/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Apply `TQE_*` environment overrides on top of the TOML values
pub fn apply_env_overrides(config: &mut TomlConfig) -> Result<()> {
    if let Ok(host) = std::env::var("TQE_HOST") {
        config.server.host = host;
    }
    if let Some(port) = parse_env::<u16>("TQE_PORT")? {
        config.server.port = port;
    }
    if let Ok(level) = std::env::var("TQE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(secs) = parse_env::<u64>("TQE_PROCESSING_TIMEOUT_SECS")? {
        config.workflow.processing_timeout_secs = secs;
    }
    if let Ok(url) = std::env::var("TQE_THRESHOLD_URL") {
        config.threshold.url = if url.trim().is_empty() { None } else { Some(url) };
    }
    Ok(())
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{} = {:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

/// Root folder resolution
///
/// CLI argument → environment variable → `root_folder` in TOML → OS default.
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return PathBuf::from(path);
    }

    default_root_folder()
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tqe"))
        .unwrap_or_else(|| PathBuf::from("./tqe_data"))
}

/// Database path inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE_NAME)
}
