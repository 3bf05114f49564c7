//! Configuration loading and root folder resolution
//!
//! Services resolve their settings in this order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name used under the platform config/data directories
pub const APP_DIR_NAME: &str = "lossless";

/// Logging configuration shared by all services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the service root folder.
///
/// `toml_root` is the `root_folder` value already read from the service's
/// TOML file, if any.
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_root: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_root {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// Default TOML path for a service: `<config dir>/lossless/<service>.toml`
pub fn default_config_path(service_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(format!("{}.toml", service_name)))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/lossless (or /var/lib/lossless for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/var/lib/lossless"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/lossless"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\lossless"))
    } else {
        PathBuf::from("./lossless_data")
    }
}

/// Load and parse a TOML file into `T`.
///
/// A missing file yields `Ok(None)`; unreadable or malformed files are errors.
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;

    toml::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        root_folder: Option<PathBuf>,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    #[serial]
    fn test_cli_arg_wins() {
        std::env::set_var("LOSSLESS_TEST_ROOT", "/from/env");
        let root = resolve_root_folder(
            Some(Path::new("/from/cli")),
            "LOSSLESS_TEST_ROOT",
            Some(Path::new("/from/toml")),
        );
        std::env::remove_var("LOSSLESS_TEST_ROOT");
        assert_eq!(root, PathBuf::from("/from/cli"));
    }

    #[test]
    #[serial]
    fn test_env_beats_toml() {
        std::env::set_var("LOSSLESS_TEST_ROOT", "/from/env");
        let root = resolve_root_folder(None, "LOSSLESS_TEST_ROOT", Some(Path::new("/from/toml")));
        std::env::remove_var("LOSSLESS_TEST_ROOT");
        assert_eq!(root, PathBuf::from("/from/env"));
    }

    #[test]
    #[serial]
    fn test_toml_then_default() {
        std::env::remove_var("LOSSLESS_TEST_ROOT");
        let root = resolve_root_folder(None, "LOSSLESS_TEST_ROOT", Some(Path::new("/from/toml")));
        assert_eq!(root, PathBuf::from("/from/toml"));

        let fallback = resolve_root_folder(None, "LOSSLESS_TEST_ROOT", None);
        assert_eq!(fallback, default_root_folder());
    }

    #[test]
    fn test_toml_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.toml");
        std::fs::write(&path, "root_folder = \"/music\"\n\n[logging]\nlevel = \"debug\"\n").unwrap();

        let loaded: Option<Sample> = load_toml_config(&path).unwrap();
        let expected = Sample {
            root_folder: Some(PathBuf::from("/music")),
            logging: LoggingConfig {
                level: "debug".to_string(),
                file: None,
            },
        };
        assert_eq!(loaded, Some(expected));
    }

    #[test]
    fn test_missing_toml_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Sample> = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "root_folder = [unterminated").unwrap();
        let result: Result<Option<Sample>> = load_toml_config(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
