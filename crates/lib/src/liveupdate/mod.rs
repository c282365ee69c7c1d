//! Live-Update Reconciler.
//!
//! Patches already-running containers in place instead of rebuilding their
//! images. Every eligibility check runs before the first container call: a
//! change-set is either applied to every running container of its target or
//! to none of them.
//!
//! Only top-level image targets are patched. Files changed in the images they
//! are built on are folded into the top-level change-set, and those base
//! images get an empty result afterwards so the next full build rebuilds them.

mod plan;
mod updater;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use plan::{Ineligible, LiveUpdatePlan, RunStepFailure, plan_live_update};
pub use updater::{AgentOps, ContainerOps, ContainerUpdater, DirectOps, PatchOutcome, PatchReport};

use crate::build::{BuildError, BuildFailure};
use crate::config::{EngineConfig, UpdateMode};
use crate::model::{ImageRef, ImageTarget, TargetId, TargetSpec, compose_targets, image_targets};
use crate::runtime::{AgentManager, ClusterEnv, ContainerRuntime};
use crate::state::{BuildResult, BuildResultSet, BuildStateSet, ContainerInfo};
use crate::sync::{SyncArchive, archive_path_mappings};

/// One target's worth of live-update work, fully validated.
struct WorkItem {
  id: TargetId,
  image: ImageRef,
  plan: LiveUpdatePlan,
  containers: Vec<ContainerInfo>,
  /// Base-image targets whose changed files are part of this change-set.
  changed_dependencies: Vec<TargetId>,
}

/// The live-update build strategy.
pub struct LiveUpdateBuildAndDeployer {
  direct: ContainerUpdater,
  agent: Option<ContainerUpdater>,
  env: ClusterEnv,
  mode: UpdateMode,
  kill_exit_code: i64,
}

impl LiveUpdateBuildAndDeployer {
  pub fn new(runtime: Arc<dyn ContainerRuntime>, agents: Option<Arc<AgentManager>>, config: &EngineConfig) -> Self {
    Self {
      direct: ContainerUpdater::direct(runtime),
      agent: agents.map(ContainerUpdater::agent),
      env: config.cluster_env,
      mode: config.update_mode,
      kill_exit_code: config.kill_exit_code,
    }
  }

  /// Pick the transport for this invocation.
  ///
  /// Compose deploys and local clusters run on the local container runtime,
  /// so they always use the direct transport.
  pub fn select_updater(&self, specs: &[TargetSpec]) -> &ContainerUpdater {
    let remote = match self.mode {
      UpdateMode::Exec => false,
      UpdateMode::Agent => true,
      UpdateMode::Auto | UpdateMode::Image => {
        compose_targets(specs).is_empty() && !self.env.is_local() && self.env != ClusterEnv::None
      }
    };
    match (&self.agent, remote) {
      (Some(agent), true) => agent,
      (None, true) => {
        warn!(env = ?self.env, "no agent connection configured; using direct container updates");
        &self.direct
      }
      (_, false) => &self.direct,
    }
  }

  /// Patch running containers for every target with pending changes.
  ///
  /// # Errors
  ///
  /// A redirect when any target needs a full build or deploy, an
  /// [`Ineligible`] error when a change-set cannot be synced, and the last
  /// per-container error otherwise. Containers that received files are listed
  /// in the failure's partial results.
  pub async fn build_and_deploy(
    &self,
    specs: &[TargetSpec],
    state: &BuildStateSet,
  ) -> Result<BuildResultSet, BuildFailure> {
    let items = extract_work_items(specs, state)?;
    let updater = self.select_updater(specs);

    let mut archives = Vec::with_capacity(items.len());
    for item in &items {
      archives.push(build_archive(item).await?);
    }

    let mut results = BuildResultSet::new();
    let mut last_error = None;

    for (item, archive) in items.iter().zip(&archives) {
      let mut updated = Vec::new();
      let mut target_error = None;

      for container in &item.containers {
        let report = updater
          .update_container(container, &item.plan, archive, self.kill_exit_code)
          .await;
        if report.copied {
          updated.push(container.container_id.clone());
        }
        if let Err(e) = report.outcome {
          warn!(target = %item.id, container = %container.container_id, error = %e, "live update failed");
          target_error = Some(e);
        }
      }

      if !updated.is_empty() || target_error.is_none() {
        info!(
          target = %item.id,
          containers = updated.len(),
          transport = updater.name(),
          "live update complete"
        );
        results.insert(item.id.clone(), BuildResult::live_update(Some(item.image.clone()), updated));
      }

      match target_error {
        Some(e) => last_error = Some(e),
        None => {
          for dep in &item.changed_dependencies {
            results.insert(dep.clone(), BuildResult::default());
          }
        }
      }
    }

    match last_error {
      Some(error) => Err(BuildFailure::with_partial(error, results)),
      None => Ok(results),
    }
  }
}

/// Archive the item's mapped files. A read failure leaves the image build to
/// pick the files up instead.
async fn build_archive(item: &WorkItem) -> Result<SyncArchive, BuildError> {
  let mappings = item.plan.mappings.clone();
  let built = tokio::task::spawn_blocking(move || archive_path_mappings(&mappings))
    .await
    .map_err(std::io::Error::other)
    .and_then(|r| r);
  built.map_err(|e| {
    warn!(target = %item.id, error = %e, "sync archive failed");
    BuildError::Ineligible(Ineligible::UnreadableFiles { reason: e.to_string() })
  })
}

/// Validate every target and build its patch plan, touching no container.
fn extract_work_items(specs: &[TargetSpec], state: &BuildStateSet) -> Result<Vec<WorkItem>, BuildError> {
  let images = image_targets(specs);
  if images.is_empty() {
    return Err(BuildError::redirect("live update needs at least one image target"));
  }

  for spec in specs.iter().filter(|s| s.is_deploy()) {
    let id = spec.id();
    if state.is_dirty(&id) {
      return Err(BuildError::redirect(format!("{id} needs a full deploy")));
    }
  }

  for image in &images {
    let id = image.id();
    if state.get(&id).and_then(|s| s.last_image()).is_none() {
      return Err(BuildError::redirect(format!("{id} has not been built yet")));
    }
  }

  let by_id: BTreeMap<TargetId, &ImageTarget> = images.iter().map(|t| (t.id(), *t)).collect();
  let base_images: BTreeSet<&TargetId> = images.iter().flat_map(|t| t.dependency_ids.iter()).collect();

  let mut items = Vec::new();
  for target in images.iter().filter(|t| !base_images.contains(&t.id())) {
    let id = target.id();
    let Some(target_state) = state.get(&id) else {
      continue;
    };
    let Some(image) = target_state.last_image().cloned() else {
      continue;
    };

    let (files, changed_dependencies) = collect_changed_files(target, &by_id, state);
    if files.is_empty() {
      debug!(target = %id, "no changed files");
      continue;
    }

    let Some(live_update) = &target.live_update else {
      return Err(BuildError::redirect(format!("{id} has no live update steps")));
    };
    if target_state.running_containers.is_empty() {
      return Err(BuildError::redirect(format!("{id} has no running containers")));
    }

    let plan = plan_live_update(live_update, &files)?;
    items.push(WorkItem {
      id,
      image,
      plan,
      containers: target_state.running_containers.clone(),
      changed_dependencies,
    });
  }

  if items.is_empty() {
    return Err(BuildError::redirect("no image targets have files to live update"));
  }
  Ok(items)
}

/// Changed files of `target` and every image it is transitively built on.
///
/// Also returns the base-image targets that contributed files.
fn collect_changed_files(
  target: &ImageTarget,
  by_id: &BTreeMap<TargetId, &ImageTarget>,
  state: &BuildStateSet,
) -> (Vec<PathBuf>, Vec<TargetId>) {
  let root = target.id();
  let mut files = BTreeSet::new();
  let mut changed_dependencies = Vec::new();
  let mut visited = BTreeSet::new();
  let mut stack = vec![root.clone()];

  while let Some(id) = stack.pop() {
    if !visited.insert(id.clone()) {
      continue;
    }
    if let Some(s) = state.get(&id)
      && s.has_changed_files()
    {
      files.extend(s.files_changed.iter().cloned());
      if id != root {
        changed_dependencies.push(id.clone());
      }
    }
    if let Some(t) = by_id.get(&id) {
      stack.extend(t.dependency_ids.iter().cloned());
    }
  }

  changed_dependencies.sort();
  (files.into_iter().collect(), changed_dependencies)
}
