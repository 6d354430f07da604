use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::FreshnessPolicy;
use crate::model::EntityKind;

/// Env var read for the backend key when the config names none.
pub const DEFAULT_API_KEY_ENV: &str = "FITOUT_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  /// Project used when a command does not name one
  pub default_project: Option<String>,
  /// Recipient whose notifications are listed
  pub user_id: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  pub url: String,
  /// Environment variable holding the API key
  #[serde(default = "default_api_key_env")]
  pub api_key_env: String,
}

fn default_api_key_env() -> String {
  DEFAULT_API_KEY_ENV.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Freshness window for every kind without an override
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
  /// Per-kind freshness windows, keyed by table name (e.g. `materials: 60`)
  #[serde(default)]
  pub stale_overrides: BTreeMap<String, u64>,
  /// Fixed refetch intervals, keyed by table name
  #[serde(default = "default_refetch_intervals")]
  pub refetch_interval_secs: BTreeMap<String, u64>,
  /// Keep confirmed lists in SQLite between runs
  #[serde(default = "default_persist")]
  pub persist: bool,
}

fn default_stale_secs() -> u64 {
  300
}

fn default_refetch_intervals() -> BTreeMap<String, u64> {
  BTreeMap::from([(EntityKind::Notification.tag().to_string(), 30)])
}

fn default_persist() -> bool {
  true
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      stale_overrides: BTreeMap::new(),
      refetch_interval_secs: default_refetch_intervals(),
      persist: default_persist(),
    }
  }
}

impl CacheConfig {
  /// Build the cache freshness policy, rejecting unknown table names.
  pub fn policy(&self) -> Result<FreshnessPolicy> {
    let mut policy =
      FreshnessPolicy::default().with_default_stale_time(Duration::seconds(secs(self.stale_secs)?));

    for (tag, stale) in &self.stale_overrides {
      policy = policy.with_stale_time(kind_for(tag)?, Duration::seconds(secs(*stale)?));
    }
    for (tag, interval) in &self.refetch_interval_secs {
      policy = policy.with_refetch_interval(kind_for(tag)?, Duration::seconds(secs(*interval)?));
    }

    Ok(policy)
  }
}

fn kind_for(tag: &str) -> Result<EntityKind> {
  EntityKind::from_tag(tag).ok_or_else(|| {
    let known: Vec<&str> = EntityKind::ALL.iter().map(|k| k.tag()).collect();
    eyre!("Unknown collection '{}' in cache config (expected one of: {})", tag, known.join(", "))
  })
}

fn secs(value: u64) -> Result<i64> {
  i64::try_from(value).map_err(|_| eyre!("Cache duration out of range: {}s", value))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fitout.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fitout/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fitout/config.yaml\n\
                 or run with --offline-demo."
      )),
    }
  }

  /// Configuration for the in-process demo store; nothing is read from disk.
  pub fn demo() -> Self {
    Self {
      backend: BackendConfig {
        url: "http://localhost:54321".to_string(),
        api_key_env: default_api_key_env(),
      },
      default_project: Some("proj-001".to_string()),
      user_id: Some("user-001".to_string()),
      cache: CacheConfig {
        persist: false,
        ..CacheConfig::default()
      },
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fitout.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fitout").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    // Surface bad cache sections at load time rather than first use.
    config.cache.policy()?;
    Ok(config)
  }

  /// Get the backend API key from the configured environment variable.
  pub fn api_key(&self) -> Result<String> {
    std::env::var(&self.backend.api_key_env).map_err(|_| {
      eyre!(
        "Backend API key not found. Set the {} environment variable.",
        self.backend.api_key_env
      )
    })
  }

  /// Project from the command line, else the configured default.
  pub fn project<'a>(&'a self, explicit: Option<&'a str>) -> Result<&'a str> {
    explicit
      .or(self.default_project.as_deref())
      .ok_or_else(|| eyre!("No project given. Pass --project or set default_project in the config."))
  }

  pub fn user(&self) -> Result<&str> {
    self
      .user_id
      .as_deref()
      .ok_or_else(|| eyre!("No user_id set in the config; it scopes notifications."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("backend:\n  url: https://db.example.com\n").unwrap();

    assert_eq!(config.backend.api_key_env, "FITOUT_API_KEY");
    assert_eq!(config.cache.stale_secs, 300);
    assert!(config.cache.persist);

    let policy = config.cache.policy().unwrap();
    assert_eq!(policy.stale_time(EntityKind::Material), Duration::minutes(5));
    assert_eq!(
      policy.refetch_interval(EntityKind::Notification),
      Some(Duration::seconds(30))
    );
  }

  #[test]
  fn test_cache_overrides() {
    let yaml = r#"
backend:
  url: https://db.example.com
  api_key_env: SITE_KEY
default_project: proj-001
cache:
  stale_secs: 120
  stale_overrides:
    activity_logs: 10
  refetch_interval_secs:
    activity_logs: 15
  persist: false
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let policy = config.cache.policy().unwrap();

    assert_eq!(policy.stale_time(EntityKind::ScopeItem), Duration::seconds(120));
    assert_eq!(policy.stale_time(EntityKind::ActivityLog), Duration::seconds(10));
    assert_eq!(
      policy.refetch_interval(EntityKind::ActivityLog),
      Some(Duration::seconds(15))
    );
    // An explicit map replaces the default notification interval.
    assert_eq!(policy.refetch_interval(EntityKind::Notification), None);
    assert_eq!(config.project(None).unwrap(), "proj-001");
    assert_eq!(config.project(Some("proj-002")).unwrap(), "proj-002");
  }

  #[test]
  fn test_unknown_collection_is_rejected() {
    let yaml = "backend:\n  url: https://db.example.com\ncache:\n  stale_overrides:\n    widgets: 5\n";
    let error = Config::from_yaml(yaml).unwrap_err();
    assert!(error.to_string().contains("widgets"));
  }

  #[test]
  fn test_missing_project_and_user() {
    let config = Config::from_yaml("backend:\n  url: https://db.example.com\n").unwrap();
    assert!(config.project(None).is_err());
    assert!(config.user().is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let error = Config::load(Some(Path::new("/nonexistent/fitout.yaml"))).unwrap_err();
    assert!(error.to_string().contains("Config file not found"));
  }
}
