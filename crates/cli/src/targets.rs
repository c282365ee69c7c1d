//! Loading a targets file.
//!
//! ```json
//! {
//!   "targets": [{ "type": "image", "name": "gcr.io/foo", "build": { ... } }],
//!   "config_files": ["settings.json"],
//!   "ignore_file": ".devloopignore"
//! }
//! ```
//!
//! Relative paths are resolved against the directory holding the targets file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use devloop_lib::model::{TargetSpec, rebase};
use devloop_lib::watch::{GlobalIgnore, WatchInputs, watchable_targets};

#[derive(Debug, Deserialize)]
pub struct TargetsFile {
  pub targets: Vec<TargetSpec>,
  /// Files whose edits are reported as configuration changes.
  #[serde(default)]
  pub config_files: Vec<PathBuf>,
  /// Ignore file applied to every watch.
  #[serde(default)]
  pub ignore_file: Option<PathBuf>,
  /// The targets file itself, once loaded.
  #[serde(skip)]
  pub path: PathBuf,
}

impl TargetsFile {
  pub fn load(path: &Path) -> Result<Self> {
    let contents = fs::read_to_string(path).with_context(|| format!("Failed to read targets file: {}", path.display()))?;
    let mut file: TargetsFile =
      serde_json::from_str(&contents).with_context(|| format!("Failed to parse targets file: {}", path.display()))?;

    file.path = dunce::canonicalize(path).with_context(|| format!("Failed to resolve {}", path.display()))?;
    let base = file.path.parent().map(Path::to_path_buf).unwrap_or_default();
    for target in &mut file.targets {
      target.resolve_relative_paths(&base);
    }
    file.config_files.iter_mut().for_each(|p| rebase(&base, p));
    if let Some(ignore) = file.ignore_file.as_mut() {
      rebase(&base, ignore);
    }

    debug!(path = %file.path.display(), targets = file.targets.len(), "loaded targets");
    Ok(file)
  }

  /// The global ignore rules, or none when no ignore file is set or it does not exist.
  pub fn global_ignore(&self) -> Result<GlobalIgnore> {
    let Some(path) = &self.ignore_file else {
      return Ok(GlobalIgnore::default());
    };
    if !path.exists() {
      return Ok(GlobalIgnore::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("Failed to read ignore file: {}", path.display()))?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(GlobalIgnore { base_dir, contents })
  }

  /// Files whose edits reload the targets: the declared config files, the
  /// ignore file and the targets file itself.
  pub fn reload_triggers(&self) -> Vec<PathBuf> {
    let mut files = self.config_files.clone();
    files.extend(self.ignore_file.iter().cloned());
    files.push(self.path.clone());
    files.sort();
    files.dedup();
    files
  }

  /// Everything the watch manager needs for this file.
  pub fn watch_inputs(&self) -> Result<WatchInputs> {
    Ok(WatchInputs {
      targets: watchable_targets(&self.targets, &self.reload_triggers()),
      global_ignore: self.global_ignore()?,
    })
  }
}
