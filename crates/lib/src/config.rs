//! Engine configuration.
//!
//! Loaded from a JSON file; every field has a default, so `{}` is a valid
//! config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_KILL_EXIT_CODE, DEFAULT_WATCH_MAX_DURATION_MS, DEFAULT_WATCH_MIN_REST_MS};
use crate::runtime::ClusterEnv;
use crate::watch::CoalesceConfig;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The config file could not be read.
  #[error("reading config {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The config file is not valid JSON for [`EngineConfig`].
  #[error("parsing config: {0}")]
  Parse(#[from] serde_json::Error),

  /// A value is out of range.
  #[error("invalid config: {0}")]
  Invalid(String),
}

/// Which update paths the engine may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
  /// Live update when possible, choosing the transport from the cluster.
  #[default]
  Auto,
  /// Never live update; always rebuild images.
  Image,
  /// Live update through the local container runtime.
  Exec,
  /// Live update through the in-pod agent.
  Agent,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub cluster_env: ClusterEnv,
  pub update_mode: UpdateMode,
  /// Run-step exit code meaning "process killed on purpose, skip restart".
  pub kill_exit_code: i64,
  pub watch_min_rest_ms: u64,
  pub watch_max_duration_ms: u64,
  pub remove_intermediate_containers: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      cluster_env: ClusterEnv::default(),
      update_mode: UpdateMode::default(),
      kill_exit_code: DEFAULT_KILL_EXIT_CODE,
      watch_min_rest_ms: DEFAULT_WATCH_MIN_REST_MS,
      watch_max_duration_ms: DEFAULT_WATCH_MAX_DURATION_MS,
      remove_intermediate_containers: true,
    }
  }
}

impl EngineConfig {
  /// Load and validate a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&contents)
  }

  pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
    let config: EngineConfig = serde_json::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.watch_min_rest_ms == 0 {
      return Err(ConfigError::Invalid("watch_min_rest_ms must be positive".to_string()));
    }
    if self.watch_max_duration_ms < self.watch_min_rest_ms {
      return Err(ConfigError::Invalid(format!(
        "watch_max_duration_ms ({}) is shorter than watch_min_rest_ms ({})",
        self.watch_max_duration_ms, self.watch_min_rest_ms
      )));
    }
    if self.kill_exit_code == 0 {
      return Err(ConfigError::Invalid("kill_exit_code cannot be 0".to_string()));
    }
    Ok(())
  }

  pub fn coalesce(&self) -> CoalesceConfig {
    CoalesceConfig {
      min_rest: Duration::from_millis(self.watch_min_rest_ms),
      max_duration: Duration::from_millis(self.watch_max_duration_ms),
    }
  }

  /// Whether live update is part of the strategy chain.
  pub fn live_update_enabled(&self) -> bool {
    self.update_mode != UpdateMode::Image
  }
}
