//! Settings loaded from an optional TOML file

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::pipeline::executor::{available_cores, ExecutorConfig, DEFAULT_IO_WORKERS};

const APP_DIR: &str = "image-batch";
const CONFIG_FILE: &str = "config.toml";

/// Overrides `cpu_workers` when set to a positive integer
pub const THREADS_ENV: &str = "IMAGE_BATCH_THREADS";

/// Default print resolution for physical units and document pages
pub const DEFAULT_DPI: u32 = 300;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the temp/session area
    pub data_dir: PathBuf,
    /// CPU-bound pool size. None means one per core.
    pub cpu_workers: Option<usize>,
    pub io_workers: usize,
    pub default_dpi: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cpu_workers: None,
            io_workers: DEFAULT_IO_WORKERS,
            default_dpi: DEFAULT_DPI,
        }
    }
}

impl Settings {
    /// Load from `path` if given, else from the user config dir, else defaults.
    /// An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env(std::env::var(THREADS_ENV).ok().as_deref());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env(&mut self, threads: Option<&str>) {
        let Some(raw) = threads else { return };
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => self.cpu_workers = Some(n),
            _ => warn!(variable = THREADS_ENV, value = raw, "Ignoring invalid thread count"),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            cpu_workers: self.cpu_workers.unwrap_or_else(available_cores).max(1),
            io_workers: self.io_workers.max(1),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

fn default_data_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml("io_workers = 8\n").unwrap();
        assert_eq!(settings.io_workers, 8);
        assert_eq!(settings.default_dpi, DEFAULT_DPI);
        assert_eq!(settings.cpu_workers, None);
    }

    #[test]
    fn test_executor_config_never_zero() {
        let settings = Settings {
            cpu_workers: Some(0),
            io_workers: 0,
            ..Default::default()
        };
        let config = settings.executor_config();
        assert_eq!(config.cpu_workers, 1);
        assert_eq!(config.io_workers, 1);
    }

    #[test]
    fn test_env_override() {
        let mut settings = Settings::default();
        settings.apply_env(Some("6"));
        assert_eq!(settings.cpu_workers, Some(6));

        settings.apply_env(Some("lots"));
        assert_eq!(settings.cpu_workers, Some(6));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = Settings::load(Some(missing.as_path())).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "io_workers = \"many\"").unwrap();
        let err = Settings::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
