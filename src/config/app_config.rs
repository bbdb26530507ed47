use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use crate::error::AppError;

/// Top level configuration document, loaded from YAML with environment
/// overrides. Every field has a default so a deployment can ship a
/// partial (or absent) YAML file and rely on env vars / defaults for
/// the rest. See SPEC_FULL.md §6 for the canonical YAML shape.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub downloads: DownloadsConfig,
    pub rclone: RcloneConfig,
    #[validate]
    pub gatekeeper: GatekeeperConfig,
    #[validate]
    pub jobs: JobsConfig,
    pub database: DatabaseConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            downloads: DownloadsConfig::default(),
            rclone: RcloneConfig::default(),
            gatekeeper: GatekeeperConfig::default(),
            jobs: JobsConfig::default(),
            database: DatabaseConfig::default(),
            notifier: NotifierConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub local_path: String,
    pub allowed_categories: Vec<String>,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            local_path: "/data/downloads".to_string(),
            allowed_categories: vec!["movies".to_string(), "tv".to_string(), "music".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RcloneConfig {
    pub base_url: String,
    pub remote_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RcloneConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5572".to_string(),
            remote_name: "seedbox".to_string(),
            username: None,
            password: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub bandwidth_limit_mbps: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub cache_max_percent: f64,
    pub cache_path: String,
    pub bandwidth_check_interval_secs: u64,
    pub disk_check_interval_secs: u64,
    pub block_jobs_during_sync: bool,
    pub require_filesize_check: bool,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            bandwidth_limit_mbps: 800.0,
            cache_max_percent: 85.0,
            cache_path: "/data/cache".to_string(),
            bandwidth_check_interval_secs: 5,
            disk_check_interval_secs: 15,
            block_jobs_during_sync: true,
            require_filesize_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct JobsConfig {
    #[validate(range(min = 1))]
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub cleanup_completed_after_hours: i64,
    pub cleanup_failed_after_hours: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            cleanup_completed_after_hours: 72,
            cleanup_failed_after_hours: 168,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "/data/seedbox-sync.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl AppConfig {
    /// Load configuration from an optional YAML file plus `SEEDBOX_*`
    /// environment overrides. Missing files are not an error; an
    /// unreadable-but-present file is.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).map_err(|e| {
                AppError::ConfigInvalid(format!("failed to seed defaults: {e}"))
            })?);

        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(
                    config::File::from(path).format(config::FileFormat::Yaml),
                );
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SEEDBOX")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| AppError::ConfigInvalid(e.to_string()))?;

        let deserializer = serde_path_to_error::deserialize(raw)
            .map_err(|e| AppError::ConfigInvalid(format!("at {}: {}", e.path(), e.inner())))?;

        let cfg: AppConfig = deserializer;
        cfg.validate()
            .map_err(|e| AppError::ConfigInvalid(e.to_string()))?;
        Ok(cfg)
    }
}
