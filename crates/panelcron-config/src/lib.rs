use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Top-level panelcron configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelcronConfig {
    /// Path to the SQLite job database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Base directory under which per-run working directories are created.
    /// Each execution runs in `<workspace_root>/<domain_id or job id>`.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Cap on concurrently running job processes.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Seconds between scheduler ticks in watch mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Base commands jobs are allowed to run.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

fn default_db_path() -> PathBuf {
    config_dir()
        .map(|d| d.join("jobs.db"))
        .unwrap_or_else(|_| PathBuf::from("jobs.db"))
}

fn default_workspace_root() -> PathBuf {
    config_dir()
        .map(|d| d.join("work"))
        .unwrap_or_else(|_| PathBuf::from("work"))
}

fn default_max_concurrent() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    60
}

fn default_allowed_commands() -> Vec<String> {
    [
        "php", "curl", "wget", "mysql", "mysqldump", "rsync", "tar", "gzip", "find", "ls", "cat",
        "grep", "awk", "sed", "sort", "uniq",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for PanelcronConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            workspace_root: default_workspace_root(),
            max_concurrent: default_max_concurrent(),
            poll_interval_seconds: default_poll_interval(),
            allowed_commands: default_allowed_commands(),
        }
    }
}

/// Resolve the panelcron config directory (~/.panelcron/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".panelcron"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.panelcron/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<PanelcronConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<PanelcronConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(PanelcronConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: PanelcronConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the default path.
pub fn save_config(config: &PanelcronConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    let path = dir.join("config.json5");
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PanelcronConfig::default();
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.poll_interval_seconds, 60);
        assert!(config.allowed_commands.iter().any(|c| c == "php"));
        assert!(config.allowed_commands.iter().all(|c| c != "rm"));
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            db_path: "/srv/panel/jobs.db",
            max_concurrent: 4,
            poll_interval_seconds: 30,
        }"#;
        let config: PanelcronConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/panel/jobs.db"));
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.poll_interval_seconds, 30);
        // Unspecified fields keep defaults
        assert!(config.allowed_commands.iter().any(|c| c == "mysqldump"));
    }

    #[test]
    fn test_json5_parse_allow_list_override() {
        let json5_str = r#"{
            allowed_commands: ["php", "node"],
        }"#;
        let config: PanelcronConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.allowed_commands, vec!["php", "node"]);
    }
}
