use crate::data_structures::SplitPolicy;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = ".filebot.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trial_limit: u32,
    pub store_path: String,
    pub report_hour: u32,
    pub report_minute: u32,
    pub expiry_warning_days: i64,
    pub split_lines: usize,
    pub message_chunk_chars: usize,
    pub report_path: Option<String>,
    pub admin_id: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trial_limit: 2,
            store_path: "subs.json".to_string(),
            report_hour: 0,
            report_minute: 0,
            expiry_warning_days: 3,
            split_lines: 1000,
            message_chunk_chars: 4000,
            report_path: None,
            admin_id: None,
        }
    }
}

impl Config {
    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expand_path(&path.as_ref().to_string_lossy());

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    pub fn store_path(&self) -> PathBuf {
        expand_path(&self.store_path)
    }

    pub fn report_path(&self) -> Option<PathBuf> {
        self.report_path.as_deref().map(expand_path)
    }

    pub fn expiry_warning_window(&self) -> Duration {
        Duration::days(self.expiry_warning_days.max(0))
    }

    pub fn default_split_policy(&self) -> SplitPolicy {
        SplitPolicy::ByLines(self.split_lines.max(1))
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.trial_limit, 2);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"trial_limit": 5, "report_hour": 9}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.trial_limit, 5);
        assert_eq!(config.report_hour, 9);
        assert_eq!(config.store_path, "subs.json");
        assert_eq!(config.message_chunk_chars, 4000);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
