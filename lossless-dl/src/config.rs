//! Configuration resolution for lossless-dl
//!
//! Priority: command line → environment → TOML file → compiled default.
//! Command-line and environment values arrive together through
//! [`Overrides`] (clap reads both); the TOML file fills whatever they leave
//! unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lossless_common::config::{resolve_root_folder, LoggingConfig};
use lossless_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::models::LosslessExtensions;
use crate::services::{JobSettings, SearchSettings, TransferSettings};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "LOSSLESS_ROOT_FOLDER";

/// Service name used for the default TOML path
pub const SERVICE_NAME: &str = "lossless-dl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5730,
        }
    }
}

/// slskd connection; all three values are required at start-up
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlskdConfig {
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub timeout_ms: u64,
    pub min_interval_ms: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub response_limit: u32,
    pub file_limit: u32,
    pub max_peer_queue: u32,
    pub min_upload_speed: u64,
    pub lossless_extensions: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            min_interval_ms: 1000,
            max_attempts: 4,
            retry_base_delay_ms: 500,
            poll_interval_ms: 500,
            response_limit: 60,
            file_limit: 10_000,
            max_peer_queue: 1_000_000,
            min_upload_speed: 0,
            lossless_extensions: crate::models::candidate::DEFAULT_LOSSLESS_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub manual_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 240,
            poll_interval_ms: 2000,
            manual_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Defaults to `<root>/downloads`
    pub output_root: Option<PathBuf>,
    pub workers_per_job: usize,
    pub max_concurrent_tracks: usize,
    pub max_tracks_per_job: usize,
    pub max_retries: usize,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub log_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            output_root: None,
            workers_per_job: 4,
            max_concurrent_tracks: 8,
            max_tracks_per_job: 50,
            max_retries: 4,
            retention_secs: 5 * 60 * 60,
            sweep_interval_secs: 60,
            log_capacity: 200,
        }
    }
}

/// Contents of `lossless-dl.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub slskd: SlskdConfig,
    pub search: SearchConfig,
    pub transfer: TransferConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// Values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root_folder: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub slskd_host: Option<String>,
    pub slskd_api_key: Option<String>,
    pub slskd_download_dir: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub workers_per_job: Option<usize>,
    pub log_level: Option<String>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub root_folder: PathBuf,
    pub server: ServerConfig,
    pub slskd_host: String,
    pub slskd_api_key: String,
    pub slskd_download_dir: PathBuf,
    pub search: SearchConfig,
    pub transfer: TransferConfig,
    pub jobs: JobsConfig,
    /// Resolved `jobs.output_root`
    pub output_root: PathBuf,
    pub logging: LoggingConfig,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ServiceConfig {
    /// Merge overrides over the TOML contents and validate the result
    pub fn resolve(toml: TomlConfig, overrides: Overrides) -> Result<Self> {
        let root_folder = resolve_root_folder(
            overrides.root_folder.as_deref(),
            ROOT_FOLDER_ENV,
            toml.root_folder.as_deref(),
        );

        let mut server = toml.server;
        if let Some(host) = non_empty(overrides.host) {
            server.host = host;
        }
        if let Some(port) = overrides.port {
            server.port = port;
        }

        let slskd_host = non_empty(overrides.slskd_host)
            .or(non_empty(toml.slskd.host))
            .ok_or_else(|| Error::Config("slskd host not configured (SLSKD_HOST or [slskd] host)".to_string()))?;
        let slskd_api_key = non_empty(overrides.slskd_api_key)
            .or(non_empty(toml.slskd.api_key))
            .ok_or_else(|| Error::Config("slskd API key not configured (SLSKD_API_KEY or [slskd] api_key)".to_string()))?;
        let slskd_download_dir = overrides
            .slskd_download_dir
            .or(toml.slskd.download_dir)
            .ok_or_else(|| {
                Error::Config("slskd download dir not configured (SLSKD_DOWNLOAD_DIR or [slskd] download_dir)".to_string())
            })?;

        let mut jobs = toml.jobs;
        if let Some(workers) = overrides.workers_per_job {
            jobs.workers_per_job = workers;
        }
        if jobs.workers_per_job == 0 {
            return Err(Error::Config("jobs.workers_per_job must be at least 1".to_string()));
        }
        let output_root = overrides
            .output_root
            .or_else(|| jobs.output_root.clone())
            .unwrap_or_else(|| root_folder.join("downloads"));

        let mut logging = toml.logging;
        if let Some(level) = non_empty(overrides.log_level) {
            logging.level = level;
        }

        Ok(Self {
            root_folder,
            server,
            slskd_host,
            slskd_api_key,
            slskd_download_dir,
            search: toml.search,
            transfer: toml.transfer,
            jobs,
            output_root,
            logging,
        })
    }

    /// Load the TOML file (if present) and resolve against `overrides`
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(|| lossless_common::config::default_config_path(SERVICE_NAME));

        let toml = match path {
            Some(path) => {
                let loaded = lossless_common::config::load_toml_config::<TomlConfig>(&path)?;
                if loaded.is_some() {
                    tracing::info!(path = %path.display(), "Loaded TOML config");
                } else if config_path.is_some() {
                    return Err(Error::Config(format!("Config file not found: {}", path.display())));
                }
                loaded.unwrap_or_default()
            }
            None => TomlConfig::default(),
        };

        Self::resolve(toml, overrides)
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            timeout: Duration::from_millis(self.search.timeout_ms),
            max_attempts: self.search.max_attempts,
            retry_base_delay: Duration::from_millis(self.search.retry_base_delay_ms),
            poll_interval: Duration::from_millis(self.search.poll_interval_ms),
            response_limit: self.search.response_limit,
            file_limit: self.search.file_limit,
            max_peer_queue: self.search.max_peer_queue,
            min_upload_speed: self.search.min_upload_speed,
            lossless: LosslessExtensions::new(&self.search.lossless_extensions),
        }
    }

    pub fn search_min_interval(&self) -> Duration {
        Duration::from_millis(self.search.min_interval_ms)
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            poll_interval: Duration::from_millis(self.transfer.poll_interval_ms),
            ..TransferSettings::new(&self.slskd_download_dir)
        }
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.timeout_secs)
    }

    pub fn manual_transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.manual_timeout_secs)
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            workers_per_job: self.jobs.workers_per_job,
            max_concurrent_tracks: self.jobs.max_concurrent_tracks,
            max_tracks_per_job: self.jobs.max_tracks_per_job,
            retention: Duration::from_secs(self.jobs.retention_secs),
            log_capacity: self.jobs.log_capacity,
            ..JobSettings::new(&self.output_root)
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.jobs.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn slskd_overrides() -> Overrides {
        Overrides {
            root_folder: Some(PathBuf::from("/srv/lossless")),
            slskd_host: Some("http://localhost:5030".to_string()),
            slskd_api_key: Some("secret".to_string()),
            slskd_download_dir: Some(PathBuf::from("/srv/slskd/downloads")),
            ..Overrides::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::resolve(TomlConfig::default(), slskd_overrides()).unwrap();
        assert_eq!(config.server.port, 5730);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.output_root, PathBuf::from("/srv/lossless/downloads"));
        assert_eq!(config.transfer_timeout(), Duration::from_secs(240));
        assert_eq!(config.jobs.max_retries, 4);
        assert_eq!(config.job_settings().log_capacity, 200);
        assert_eq!(config.job_settings().retention, Duration::from_secs(18_000));
        assert!(config.search_settings().lossless.contains("flac"));
    }

    #[test]
    fn test_missing_slskd_settings_rejected() {
        let err = ServiceConfig::resolve(TomlConfig::default(), Overrides::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let mut overrides = slskd_overrides();
        overrides.slskd_api_key = Some("  ".to_string());
        assert!(ServiceConfig::resolve(TomlConfig::default(), overrides).is_err());
    }

    #[test]
    fn test_overrides_beat_toml() {
        let toml: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 6000

            [slskd]
            host = "http://toml-host:5030"
            api_key = "toml-key"
            download_dir = "/toml/downloads"

            [jobs]
            workers_per_job = 2
            output_root = "/toml/out"
            "#,
        )
        .unwrap();

        let from_toml = ServiceConfig::resolve(
            toml.clone(),
            Overrides {
                root_folder: Some(PathBuf::from("/r")),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(from_toml.server.port, 6000);
        assert_eq!(from_toml.slskd_host, "http://toml-host:5030");
        assert_eq!(from_toml.jobs.workers_per_job, 2);
        assert_eq!(from_toml.output_root, PathBuf::from("/toml/out"));

        let overridden = ServiceConfig::resolve(
            toml,
            Overrides {
                port: Some(7000),
                workers_per_job: Some(6),
                output_root: Some(PathBuf::from("/cli/out")),
                ..slskd_overrides()
            },
        )
        .unwrap();
        assert_eq!(overridden.server.port, 7000);
        assert_eq!(overridden.slskd_host, "http://localhost:5030");
        assert_eq!(overridden.jobs.workers_per_job, 6);
        assert_eq!(overridden.output_root, PathBuf::from("/cli/out"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut overrides = slskd_overrides();
        overrides.workers_per_job = Some(0);
        assert!(ServiceConfig::resolve(TomlConfig::default(), overrides).is_err());
    }

    #[test]
    #[serial]
    fn test_root_folder_from_env() {
        std::env::set_var(ROOT_FOLDER_ENV, "/env/root");
        let mut overrides = slskd_overrides();
        overrides.root_folder = None;
        let config = ServiceConfig::resolve(TomlConfig::default(), overrides).unwrap();
        std::env::remove_var(ROOT_FOLDER_ENV);
        assert_eq!(config.root_folder, PathBuf::from("/env/root"));
    }

    #[test]
    fn test_load_explicit_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        assert!(ServiceConfig::load(Some(&missing), slskd_overrides()).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lossless-dl.toml");
        std::fs::write(&path, "[search]\ntimeout_ms = 3000\nlossless_extensions = [\"flac\"]\n").unwrap();

        let config = ServiceConfig::load(Some(&path), slskd_overrides()).unwrap();
        assert_eq!(config.search_settings().timeout, Duration::from_millis(3000));
        assert!(!config.search_settings().lossless.contains("wav"));
    }
}
