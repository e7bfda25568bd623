//! deskcheck daemon configuration loading and parsing

use anyhow::{Context, Result};
use deskcheck_tools::ToolboxConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "/etc/deskcheck/config.toml";
const CONFIG_ENV: &str = "DESKCHECK_CONFIG";

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct DashConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub toolbox: ToolboxConfig,
}

#[derive(Debug, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }

/// Pick the config file: explicit flag, then environment, then the system path
pub fn resolve_path(flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from `path`. A missing file yields defaults; a file
/// that exists but does not parse is an error.
pub fn load_config(path: &Path) -> Result<(DashConfig, bool)> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: DashConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((DashConfig::default(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let (config, found) = load_config(&dir.path().join("absent.toml")).unwrap();

        assert!(!found);
        assert_eq!(config.system.log_level, "info");
        assert!(!config.system.log_json);
        assert_eq!(config.toolbox.monitor.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [system]
            log_level = "debug"
            log_json = true

            [toolbox]
            data_dir = "/var/lib/deskcheck"

            [toolbox.monitor]
            interval_ms = 10000
            retries = 5

            [toolbox.executor]
            default_timeout_ms = 5000
            "#,
        )
        .unwrap();

        let (config, found) = load_config(&path).unwrap();
        assert!(found);
        assert_eq!(config.system.log_level, "debug");
        assert!(config.system.log_json);
        assert_eq!(config.toolbox.data_dir, PathBuf::from("/var/lib/deskcheck"));
        assert_eq!(config.toolbox.monitor.retries, 5);
        assert_eq!(config.toolbox.monitor.retry_delay_ms, 1000);
        assert_eq!(config.toolbox.executor.default_timeout_ms, 5000);
    }

    #[test]
    fn test_malformed_config_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[system\nlog_level = ").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_flag_wins_over_default() {
        let flagged = resolve_path(Some(Path::new("/tmp/custom.toml")));
        assert_eq!(flagged, PathBuf::from("/tmp/custom.toml"));
    }
}
