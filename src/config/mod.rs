pub mod app_config;
pub mod handle;
pub mod logging;

pub use app_config::{
    AppConfig, DatabaseConfig, DownloadsConfig, GatekeeperConfig, JobsConfig, LogFormat,
    LoggingConfig, NotifierConfig, RcloneConfig, ServerConfig,
};
pub use handle::ConfigHandle;
