//! Collector configuration.
//!
//! All keys are read once at subsystem start; there is no hot reload.
//! Files load through the `config` crate with format auto-detection and
//! `${VAR}` environment substitution.

use config::{Config as Cfg, File, FileFormat};
use error_stack::{Report, ResultExt};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{KernelError, KernelResult};

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// CollectorConfig
// ---------------------------------------------------------------------------

/// Start-time configuration of the data collection subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Number of collector workers.
    pub data_collector_count: usize,
    /// Polling cadence applied to items with a non-positive interval,
    /// seconds.
    pub default_polling_interval: i64,
    /// Retention hint applied to items with a non-positive retention, days.
    /// Opaque to the core, forwarded downstream.
    pub default_retention_days: i32,
    /// Node id of the management server itself, the last-resort SSH proxy.
    pub management_node_id: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            data_collector_count: 10,
            default_polling_interval: 60,
            default_retention_days: 30,
            management_node_id: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Detect configuration format from a file extension.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("no file extension".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute `${VAR}` environment references. Unset variables are left
/// verbatim so the parse error points at the offending key.
pub fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .to_string()
}

/// Load a configuration file into any deserializable type.
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content);

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Load a [`CollectorConfig`], treating a missing file as all-defaults.
///
/// This is the subsystem's start-time entry point, so it lifts the typed
/// [`ConfigError`] into the crate-level [`KernelResult`] with the offending
/// path attached.
pub fn load_collector_config(path: &str) -> KernelResult<CollectorConfig> {
    if !Path::new(path).exists() {
        return Ok(CollectorConfig::default());
    }
    load_config(path)
        .map_err(KernelError::from)
        .map_err(Report::new)
        .attach_printable_lazy(|| format!("loading collector configuration from {path}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
