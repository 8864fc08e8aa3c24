use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheOptions, SqliteStorage};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub api: ServerConfig,
  pub blog: BlogConfig,
  pub swapi: SwapiConfig,
  pub cache: CacheConfig,
  pub storage: StorageConfig,
  pub logging: LoggingConfig,
}

/// Clinic (lazy-days) server
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
  pub url: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:3030".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlogConfig {
  pub url: String,
}

impl Default for BlogConfig {
  fn default() -> Self {
    Self {
      url: "https://jsonplaceholder.typicode.com".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwapiConfig {
  /// First page of the people listing
  pub url: String,
}

impl Default for SwapiConfig {
  fn default() -> Self {
    Self {
      url: "https://swapi.dev/api/people/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  /// How long fetched data counts as fresh
  pub stale_time_secs: u64,
  /// How long unobserved entries are kept
  pub cache_time_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: 600,
      cache_time_secs: 900,
    }
  }
}

impl CacheConfig {
  pub fn options(&self) -> CacheOptions {
    CacheOptions {
      stale_time: Duration::from_secs(self.stale_time_secs),
      cache_time: Duration::from_secs(self.cache_time_secs),
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
  /// Persist the signed-in user between runs
  pub enabled: bool,
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

impl StorageConfig {
  pub fn resolved_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive; `RUST_LOG` takes precedence
  pub level: String,
  /// Write daily log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lazyq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lazyq/config.yaml
  ///
  /// Defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("lazyq.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lazyq").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_partial_file_keeps_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "api:\n  url: http://clinic.test\ncache:\n  stale_time_secs: 5\nstorage:\n  enabled: false"
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.api.url, "http://clinic.test");
    assert_eq!(config.cache.stale_time_secs, 5);
    assert_eq!(config.cache.cache_time_secs, 900);
    assert!(!config.storage.enabled);
    assert_eq!(config.blog, BlogConfig::default());
    assert_eq!(config.logging.level, "info");
  }

  #[test]
  fn test_explicit_path_must_exist() {
    let dir = tempfile::TempDir::new().unwrap();
    let missing = dir.path().join("nope.yaml");
    let err = Config::load(Some(&missing)).unwrap_err();
    assert!(err.to_string().starts_with("Config file not found"));
  }

  #[test]
  fn test_invalid_yaml_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cache: [not, a, map]").unwrap();
    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().starts_with("Failed to parse config file"));
  }

  #[test]
  fn test_cache_options_from_seconds() {
    let options = CacheConfig::default().options();
    assert_eq!(options, CacheOptions::default());
  }
}
