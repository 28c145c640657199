use crate::constants::{MIN_RECONCILE_INTERVAL_MINS, POLL_INTERVAL_SECS, USAGE_WINDOW_SECS};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "snooper.db";

/// Error type for configuration and startup path resolution
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine project directories")]
    NoProjectDirs,

    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not create data directory: {0}")]
    DataDirCreation(std::io::Error),
}

/// Runtime settings. Every field has a default so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll_interval_secs: u64,
    pub usage_window_secs: u64,
    pub reconcile_interval_mins: u64,
    /// Overrides the platform data directory (database, host record, status file).
    pub data_dir: Option<PathBuf>,
    /// Extra directories searched for `.desktop` entries when resolving labels.
    pub application_dirs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: POLL_INTERVAL_SECS,
            usage_window_secs: USAGE_WINDOW_SECS,
            reconcile_interval_mins: MIN_RECONCILE_INTERVAL_MINS,
            data_dir: None,
            application_dirs: Vec::new(),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("com", "app", "Snooper").ok_or(ConfigError::NoProjectDirs)
}

impl Config {
    /// Load `config.toml` from the platform config directory, or defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = project_dirs()?.config_dir().join(CONFIG_FILE_NAME);
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(toml::from_str(&contents)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn usage_window(&self) -> Duration {
        Duration::from_secs(self.usage_window_secs.max(1))
    }

    /// Reconcile interval, clamped up to the scheduler floor.
    pub fn reconcile_interval(&self) -> Duration {
        if self.reconcile_interval_mins < MIN_RECONCILE_INTERVAL_MINS {
            warn!(
                "reconcile_interval_mins={} is below the {MIN_RECONCILE_INTERVAL_MINS} minute floor, clamping",
                self.reconcile_interval_mins
            );
        }
        Duration::from_secs(self.reconcile_interval_mins.max(MIN_RECONCILE_INTERVAL_MINS).saturating_mul(60))
    }

    /// Data directory, created if needed.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => project_dirs()?.data_dir().to_path_buf(),
        };
        std::fs::create_dir_all(&dir).map_err(ConfigError::DataDirCreation)?;
        Ok(dir)
    }

    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(DB_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.usage_window(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_secs = 2\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.usage_window_secs, USAGE_WINDOW_SECS);
    }

    #[test]
    fn test_reconcile_interval_is_clamped_to_floor() {
        let config = Config {
            reconcile_interval_mins: 1,
            ..Config::default()
        };
        assert_eq!(config.reconcile_interval(), Duration::from_secs(15 * 60));

        let config = Config {
            reconcile_interval_mins: 60,
            ..Config::default()
        };
        assert_eq!(config.reconcile_interval(), Duration::from_secs(60 * 60));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_secs = \"fast\"\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_data_dir_override_is_created() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("data");
        let config = Config {
            data_dir: Some(data_dir.clone()),
            ..Config::default()
        };

        assert_eq!(config.db_path().unwrap(), data_dir.join("snooper.db"));
        assert!(data_dir.is_dir());
    }
}
