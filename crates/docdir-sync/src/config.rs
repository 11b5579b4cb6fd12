//! Engine configuration, read from an optional TOML file layered with
//! `DOCDIR_*` environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::Deserialize;

use crate::retry::BackoffPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub store_path:          PathBuf,
  pub max_retries:         usize,
  pub retry_base_delay_ms: u64,
  pub retry_max_delay_ms:  u64,
  /// How long a reconciliation waits for another one of the same
  /// establishment before giving up.
  pub reconcile_wait_ms:   u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      store_path:          PathBuf::from("docdir.sqlite3"),
      max_retries:         3,
      retry_base_delay_ms: 100,
      retry_max_delay_ms:  2_000,
      reconcile_wait_ms:   30_000,
    }
  }
}

impl SyncConfig {
  /// Load from `path` (which need not exist) and the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(config::Environment::with_prefix("DOCDIR"))
      .build()?
      .try_deserialize()
  }

  pub fn backoff(&self) -> BackoffPolicy {
    BackoffPolicy {
      max_retries: self.max_retries,
      base_delay:  Duration::from_millis(self.retry_base_delay_ms),
      max_delay:   Duration::from_millis(self.retry_max_delay_ms),
    }
  }

  pub fn reconcile_wait(&self) -> Duration { Duration::from_millis(self.reconcile_wait_ms) }

  /// `store_path` with a leading `~` expanded to the user's home directory.
  pub fn resolved_store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let cfg = SyncConfig::load(Path::new("/nonexistent/docdir.toml")).unwrap();
    assert_eq!(cfg.max_retries, SyncConfig::default().max_retries);
    assert_eq!(cfg.reconcile_wait(), Duration::from_secs(30));
  }

  #[test]
  fn backoff_follows_config() {
    let cfg = SyncConfig { max_retries: 5, retry_base_delay_ms: 10, ..Default::default() };
    let policy = cfg.backoff();
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(40));
  }

  #[test]
  fn relative_paths_are_left_alone() {
    assert_eq!(expand_tilde(Path::new("data/docdir.sqlite3")), PathBuf::from("data/docdir.sqlite3"));
  }
}
