//! Target identity and target specifications.
//!
//! A [`TargetId`] names an independently buildable or deployable unit. A
//! [`TargetSpec`] describes how to produce it: an image build (optionally
//! live-updatable), a Kubernetes deploy, or a compose deploy.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::cmd::Cmd;
use super::matcher::PathSet;
use crate::consts::CONFIGS_TARGET_NAME;
use crate::runtime::K8sEntity;

/// The kind half of a target identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
  Image,
  K8s,
  Compose,
  Configs,
}

impl fmt::Display for TargetKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TargetKind::Image => "image",
      TargetKind::K8s => "k8s",
      TargetKind::Compose => "compose",
      TargetKind::Configs => "configs",
    };
    f.write_str(s)
  }
}

/// Identity of a target: kind plus name.
///
/// Two targets are the same target exactly when their ids are equal,
/// regardless of how their specifications differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId {
  pub kind: TargetKind,
  pub name: String,
}

impl TargetId {
  pub fn new(kind: TargetKind, name: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
    }
  }

  pub fn image(name: impl Into<String>) -> Self {
    Self::new(TargetKind::Image, name)
  }

  pub fn k8s(name: impl Into<String>) -> Self {
    Self::new(TargetKind::K8s, name)
  }

  pub fn compose(name: impl Into<String>) -> Self {
    Self::new(TargetKind::Compose, name)
  }

  /// The singleton target for configuration files.
  pub fn configs() -> Self {
    Self::new(TargetKind::Configs, CONFIGS_TARGET_NAME)
  }
}

impl fmt::Display for TargetId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.name)
  }
}

/// Maps a local path (file or directory) to a destination inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRule {
  pub local_path: PathBuf,
  /// Absolute POSIX path in the container. A trailing `/` on a file rule
  /// places the file inside that directory.
  pub container_path: String,
}

impl SyncRule {
  pub fn new(local_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
    Self {
      local_path: local_path.into(),
      container_path: container_path.into(),
    }
  }
}

/// A command run inside the container during a live update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStep {
  pub cmd: Cmd,
  /// Files that trigger this step. Empty means the step always runs.
  #[serde(default)]
  pub triggers: PathSet,
}

impl RunStep {
  pub fn new(cmd: Cmd) -> Self {
    Self {
      cmd,
      triggers: PathSet::default(),
    }
  }

  pub fn with_triggers(cmd: Cmd, triggers: PathSet) -> Self {
    Self { cmd, triggers }
  }

  /// Whether this step should run for the given changed files.
  pub fn is_triggered_by(&self, files: &[PathBuf]) -> bool {
    self.triggers.is_empty() || files.iter().any(|f| self.triggers.matches(f))
  }
}

/// In-place update description for an image target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiveUpdate {
  #[serde(default)]
  pub syncs: Vec<SyncRule>,
  #[serde(default)]
  pub runs: Vec<RunStep>,
  /// A change to any of these files forces a full image build.
  #[serde(default)]
  pub fall_back_on: PathSet,
  /// When set, the container's process picks changes up itself and is never restarted.
  #[serde(default)]
  pub hot_reload: bool,
}

impl LiveUpdate {
  pub fn is_empty(&self) -> bool {
    self.syncs.is_empty() && self.runs.is_empty()
  }
}

/// How to run a full image build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DockerBuild {
  /// Contents of the Dockerfile.
  pub dockerfile: String,
  /// Root of the build context.
  pub context: PathBuf,
  #[serde(default)]
  pub build_args: BTreeMap<String, String>,
}

/// An ignore file's patterns, anchored at the directory that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreSpec {
  pub base_dir: PathBuf,
  pub patterns: Vec<String>,
}

impl IgnoreSpec {
  pub fn new(base_dir: impl Into<PathBuf>, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
    Self {
      base_dir: base_dir.into(),
      patterns: patterns.into_iter().map(Into::into).collect(),
    }
  }

  /// Parse the text of an ignore file: one pattern per line, `#` comments.
  pub fn parse(base_dir: impl Into<PathBuf>, contents: &str) -> Self {
    let patterns = contents
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty() && !l.starts_with('#'))
      .map(String::from)
      .collect();
    Self {
      base_dir: base_dir.into(),
      patterns,
    }
  }
}

/// An image to build, optionally patchable in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTarget {
  /// Image repository name, e.g. `gcr.io/some-project/frontend`.
  pub name: String,
  pub build: DockerBuild,
  #[serde(default)]
  pub live_update: Option<LiveUpdate>,
  /// Image targets this image is built on top of.
  #[serde(default)]
  pub dependency_ids: Vec<TargetId>,
  /// Version-control roots inside the watched paths.
  #[serde(default)]
  pub local_repos: Vec<PathBuf>,
  /// Ignore rules for both watching and the build context.
  #[serde(default)]
  pub ignores: Vec<IgnoreSpec>,
  /// Directories never watched.
  #[serde(default)]
  pub ignored_dirs: Vec<PathBuf>,
}

impl ImageTarget {
  pub fn new(name: impl Into<String>, build: DockerBuild) -> Self {
    Self {
      name: name.into(),
      build,
      live_update: None,
      dependency_ids: Vec::new(),
      local_repos: Vec::new(),
      ignores: Vec::new(),
      ignored_dirs: Vec::new(),
    }
  }

  pub fn with_live_update(mut self, live_update: LiveUpdate) -> Self {
    self.live_update = Some(live_update);
    self
  }

  pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TargetId>) -> Self {
    self.dependency_ids = deps.into_iter().collect();
    self
  }

  pub fn id(&self) -> TargetId {
    TargetId::image(&self.name)
  }

  /// Local paths whose changes affect this image: the build context plus
  /// every sync root outside of it.
  pub fn watched_paths(&self) -> Vec<PathBuf> {
    let mut paths = vec![self.build.context.clone()];
    if let Some(lu) = &self.live_update {
      for sync in &lu.syncs {
        if !is_under_any(&sync.local_path, &paths) {
          paths.push(sync.local_path.clone());
        }
      }
    }
    paths.sort();
    paths
  }
}

/// Kubernetes entities deployed with the images they reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sTarget {
  pub name: String,
  pub entities: Vec<K8sEntity>,
  /// Image targets whose refs are injected into the entities.
  #[serde(default)]
  pub dependency_ids: Vec<TargetId>,
}

impl K8sTarget {
  pub fn id(&self) -> TargetId {
    TargetId::k8s(&self.name)
  }
}

/// A compose service deployed from local compose files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeTarget {
  pub name: String,
  pub config_paths: Vec<PathBuf>,
  pub service: String,
  #[serde(default)]
  pub dependency_ids: Vec<TargetId>,
}

impl ComposeTarget {
  pub fn id(&self) -> TargetId {
    TargetId::compose(&self.name)
  }
}

/// Declarative description of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetSpec {
  Image(ImageTarget),
  K8s(K8sTarget),
  Compose(ComposeTarget),
}

impl TargetSpec {
  pub fn id(&self) -> TargetId {
    match self {
      TargetSpec::Image(t) => t.id(),
      TargetSpec::K8s(t) => t.id(),
      TargetSpec::Compose(t) => t.id(),
    }
  }

  pub fn dependency_ids(&self) -> &[TargetId] {
    match self {
      TargetSpec::Image(t) => &t.dependency_ids,
      TargetSpec::K8s(t) => &t.dependency_ids,
      TargetSpec::Compose(t) => &t.dependency_ids,
    }
  }

  pub fn as_image(&self) -> Option<&ImageTarget> {
    match self {
      TargetSpec::Image(t) => Some(t),
      _ => None,
    }
  }

  pub fn is_deploy(&self) -> bool {
    matches!(self, TargetSpec::K8s(_) | TargetSpec::Compose(_))
  }

  /// Anchor every relative local path at `base`.
  pub fn resolve_relative_paths(&mut self, base: &Path) {
    match self {
      TargetSpec::Image(t) => {
        rebase(base, &mut t.build.context);
        if let Some(lu) = t.live_update.as_mut() {
          lu.syncs.iter_mut().for_each(|s| rebase(base, &mut s.local_path));
          lu.runs.iter_mut().for_each(|r| rebase(base, &mut r.triggers.base_dir));
          rebase(base, &mut lu.fall_back_on.base_dir);
        }
        t.local_repos.iter_mut().for_each(|p| rebase(base, p));
        t.ignores.iter_mut().for_each(|i| rebase(base, &mut i.base_dir));
        t.ignored_dirs.iter_mut().for_each(|p| rebase(base, p));
      }
      TargetSpec::Compose(t) => t.config_paths.iter_mut().for_each(|p| rebase(base, p)),
      TargetSpec::K8s(_) => {}
    }
  }
}

/// All image targets in a target list, in list order.
pub fn image_targets(specs: &[TargetSpec]) -> Vec<&ImageTarget> {
  specs.iter().filter_map(TargetSpec::as_image).collect()
}

/// All K8s targets in a target list, in list order.
pub fn k8s_targets(specs: &[TargetSpec]) -> Vec<&K8sTarget> {
  specs
    .iter()
    .filter_map(|s| match s {
      TargetSpec::K8s(t) => Some(t),
      _ => None,
    })
    .collect()
}

/// All compose targets in a target list, in list order.
pub fn compose_targets(specs: &[TargetSpec]) -> Vec<&ComposeTarget> {
  specs
    .iter()
    .filter_map(|s| match s {
      TargetSpec::Compose(t) => Some(t),
      _ => None,
    })
    .collect()
}

/// Join a relative path onto `base`; an empty path becomes `base` itself.
pub fn rebase(base: &Path, path: &mut PathBuf) {
  if path.as_os_str().is_empty() {
    *path = base.to_path_buf();
  } else if path.is_relative() {
    *path = base.join(&*path);
  }
}

fn is_under_any(path: &Path, roots: &[PathBuf]) -> bool {
  roots.iter().any(|r| path.starts_with(r))
}
