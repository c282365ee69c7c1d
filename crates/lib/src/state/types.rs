//! Build results and per-target build state.
//!
//! A [`BuildResultSet`] is what one cycle produced. A [`BuildStateSet`] is the
//! snapshot a cycle reads: per target, the last result, the files changed
//! since, and the containers currently running that result. Cycles never
//! mutate the snapshot they were given; [`BuildStateSet::advance`] derives the
//! next one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{ContainerId, ImageRef, PodId, TargetId};

/// One running container that hosts a target's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerInfo {
  pub pod_id: PodId,
  pub container_id: ContainerId,
  pub container_name: String,
  pub namespace: String,
}

impl ContainerInfo {
  pub fn new(pod_id: &str, container_id: &str, container_name: &str, namespace: &str) -> Self {
    Self {
      pod_id: PodId::from(pod_id),
      container_id: ContainerId::from(container_id),
      container_name: container_name.to_string(),
      namespace: namespace.to_string(),
    }
  }
}

/// Output of building or deploying one target.
///
/// Empty means nothing new was produced; a dependency's result is emptied to
/// force its rebuild on the next full build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildResult {
  #[serde(default)]
  pub image: Option<ImageRef>,
  #[serde(default)]
  pub live_updated_container_ids: Vec<ContainerId>,
  /// What a deploy created or updated: cluster UIDs, or compose service names.
  #[serde(default)]
  pub deployed_uids: Vec<String>,
}

impl BuildResult {
  pub fn image(image: ImageRef) -> Self {
    Self {
      image: Some(image),
      ..Default::default()
    }
  }

  pub fn live_update(image: Option<ImageRef>, container_ids: Vec<ContainerId>) -> Self {
    Self {
      image,
      live_updated_container_ids: container_ids,
      deployed_uids: Vec::new(),
    }
  }

  pub fn deployed(uids: Vec<String>) -> Self {
    Self {
      deployed_uids: uids,
      ..Default::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.image.is_none() && self.live_updated_container_ids.is_empty() && self.deployed_uids.is_empty()
  }
}

/// Results of one cycle, by target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildResultSet(BTreeMap<TargetId, BuildResult>);

impl BuildResultSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, id: TargetId, result: BuildResult) {
    self.0.insert(id, result);
  }

  pub fn get(&self, id: &TargetId) -> Option<&BuildResult> {
    self.0.get(id)
  }

  pub fn contains(&self, id: &TargetId) -> bool {
    self.0.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&TargetId, &BuildResult)> {
    self.0.iter()
  }

  pub fn image(&self, id: &TargetId) -> Option<&ImageRef> {
    self.0.get(id).and_then(|r| r.image.as_ref())
  }

  /// Merge `other` into this set; entries in `other` win.
  pub fn merge(&mut self, other: BuildResultSet) {
    self.0.extend(other.0);
  }

  /// Every live-updated container across all targets, in target order.
  pub fn live_updated_container_ids(&self) -> Vec<ContainerId> {
    self.0.values().flat_map(|r| r.live_updated_container_ids.iter().cloned()).collect()
  }
}

impl FromIterator<(TargetId, BuildResult)> for BuildResultSet {
  fn from_iter<I: IntoIterator<Item = (TargetId, BuildResult)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl IntoIterator for BuildResultSet {
  type Item = (TargetId, BuildResult);
  type IntoIter = std::collections::btree_map::IntoIter<TargetId, BuildResult>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

/// Per-target carry-over between cycles.
///
/// `files_changed` is empty exactly when `last_result` reflects what is
/// deployed. Files are cleared only when a build attributed to them succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildState {
  pub last_result: BuildResult,
  pub files_changed: BTreeSet<PathBuf>,
  pub running_containers: Vec<ContainerInfo>,
}

impl BuildState {
  pub fn new(last_result: BuildResult, files_changed: impl IntoIterator<Item = PathBuf>) -> Self {
    Self {
      last_result,
      files_changed: files_changed.into_iter().collect(),
      running_containers: Vec::new(),
    }
  }

  pub fn with_running_containers(mut self, containers: Vec<ContainerInfo>) -> Self {
    self.running_containers = containers;
    self
  }

  pub fn last_image(&self) -> Option<&ImageRef> {
    self.last_result.image.as_ref()
  }

  /// Changed files in sorted order.
  pub fn files_changed(&self) -> Vec<PathBuf> {
    self.files_changed.iter().cloned().collect()
  }

  pub fn has_changed_files(&self) -> bool {
    !self.files_changed.is_empty()
  }

  /// Record more changed files. Recording the same file twice is a no-op.
  pub fn add_files_changed(&mut self, files: impl IntoIterator<Item = PathBuf>) {
    self.files_changed.extend(files);
  }
}

/// The snapshot one cycle reads, by target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildStateSet(BTreeMap<TargetId, BuildState>);

impl BuildStateSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, id: &TargetId) -> Option<&BuildState> {
    self.0.get(id)
  }

  pub fn insert(&mut self, id: TargetId, state: BuildState) {
    self.0.insert(id, state);
  }

  pub fn with(mut self, id: TargetId, state: BuildState) -> Self {
    self.insert(id, state);
    self
  }

  pub fn iter(&self) -> impl Iterator<Item = (&TargetId, &BuildState)> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Whether the target has never produced a result or has pending changes.
  pub fn is_dirty(&self, id: &TargetId) -> bool {
    self.0.get(id).is_none_or(|s| s.has_changed_files() || s.last_result.is_empty())
  }

  /// Accumulate changed files for a target, creating its state if needed.
  pub fn record_files_changed(&mut self, id: &TargetId, files: impl IntoIterator<Item = PathBuf>) {
    self.0.entry(id.clone()).or_default().add_files_changed(files);
  }

  /// Replace the running containers known for a target.
  pub fn record_running_containers(&mut self, id: &TargetId, containers: Vec<ContainerInfo>) {
    self.0.entry(id.clone()).or_default().running_containers = containers;
  }

  /// The state set that follows a successful cycle.
  ///
  /// Every target in `results` takes its new result and loses its changed
  /// files; running containers are carried over. Targets not in `results`
  /// are copied unchanged.
  pub fn advance(&self, results: &BuildResultSet) -> BuildStateSet {
    let mut next = self.clone();
    for (id, result) in results.iter() {
      let entry = next.0.entry(id.clone()).or_default();
      entry.last_result = result.clone();
      entry.files_changed.clear();
    }
    next
  }

  /// The state set that follows a failed cycle that still touched containers.
  ///
  /// Live-updated containers are recorded, but changed files stay pending so
  /// the next cycle retries them.
  pub fn record_partial(&self, partial: &BuildResultSet) -> BuildStateSet {
    let mut next = self.clone();
    for (id, result) in partial.iter() {
      if result.live_updated_container_ids.is_empty() {
        continue;
      }
      let entry = next.0.entry(id.clone()).or_default();
      entry.last_result.live_updated_container_ids = result.live_updated_container_ids.clone();
    }
    next
  }
}

impl FromIterator<(TargetId, BuildState)> for BuildStateSet {
  fn from_iter<I: IntoIterator<Item = (TargetId, BuildState)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}
