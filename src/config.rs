//! Configuration management for the fraud scoring service

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default TOML file consulted when `SCORER_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variables that override individual configuration keys
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("STORAGE_CONNECTION_STRING", "storage.connection_string"),
    ("MODEL_CONTAINER", "storage.container"),
    ("META_FILE", "storage.meta_file"),
    ("MODEL_FILE", "storage.model_file"),
    ("MODEL_FORMAT", "storage.model_format"),
    ("LISTEN_ADDR", "server.listen_addr"),
    ("MAX_UPLOAD_BYTES", "server.max_upload_bytes"),
    ("PRELOAD_MODEL", "server.preload_model"),
    ("LOG_LEVEL", "logging.level"),
    ("LOG_FORMAT", "logging.format"),
    ("METRICS_INTERVAL_SECS", "metrics.report_interval_secs"),
];

/// Serialized model format stored in the container
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Pick by object name: `.onnx` is ONNX, anything else LightGBM text
    #[default]
    Auto,
    /// LightGBM text dump (`Booster.save_model`)
    #[serde(rename = "lightgbm")]
    LightGbm,
    /// ONNX classifier graph
    Onnx,
}

impl ModelFormat {
    /// Resolve `Auto` against the model object name.
    pub fn resolve(self, model_file: &str) -> ModelFormat {
        match self {
            ModelFormat::Auto => {
                if model_file.to_ascii_lowercase().ends_with(".onnx") {
                    ModelFormat::Onnx
                } else {
                    ModelFormat::LightGbm
                }
            }
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Auto => "auto",
            ModelFormat::LightGbm => "lightgbm",
            ModelFormat::Onnx => "onnx",
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Object store holding the model artifacts
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Azure storage connection string or `file://<dir>`.
    /// Absence is reported as a load failure at request time, not at startup.
    #[serde(default)]
    pub connection_string: Option<String>,
    /// Container (bucket) holding both artifacts
    pub container: String,
    /// JSON metadata object listing the model's features
    pub meta_file: String,
    /// Serialized model object
    pub model_file: String,
    #[serde(default)]
    pub model_format: ModelFormat,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind
    pub listen_addr: String,
    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,
    /// Load the model at startup instead of on the first request
    pub preload_model: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between periodic summaries; 0 disables the reporter
    pub report_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from the default file (if present) and the process environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("SCORER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_with(Some(&path), |key| std::env::var(key).ok())
    }

    /// Load configuration from an optional file and an environment lookup.
    ///
    /// Precedence, lowest first: built-in defaults, the file, the environment.
    /// Empty environment values are ignored.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let mut builder = Config::builder()
            .set_default("storage.container", defaults.storage.container)?
            .set_default("storage.meta_file", defaults.storage.meta_file)?
            .set_default("storage.model_file", defaults.storage.model_file)?
            .set_default("storage.model_format", defaults.storage.model_format.as_str())?
            .set_default("server.listen_addr", defaults.server.listen_addr)?
            .set_default("server.max_upload_bytes", defaults.server.max_upload_bytes as u64)?
            .set_default("server.preload_model", defaults.server.preload_model)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .set_default(
                "metrics.report_interval_secs",
                defaults.metrics.report_interval_secs,
            )?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        for (var, key) in ENV_OVERRIDES {
            let value = env(var).filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                connection_string: None,
                container: "models".to_string(),
                meta_file: "model_meta.json".to_string(),
                model_file: "model.txt".to_string(),
                model_format: ModelFormat::Auto,
            },
            server: ServerConfig {
                listen_addr: "0.0.0.0:8080".to_string(),
                max_upload_bytes: 100 * 1024 * 1024,
                preload_model: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            metrics: MetricsConfig {
                report_interval_secs: 0,
            },
        }
    }
}
