//! Deploy strategies: Kubernetes entities and compose services.

use std::sync::Arc;

use tracing::{debug, info};

use super::image::ImageBuilder;
use super::{BuildError, BuildFailure, TargetQueue};
use crate::consts::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::model::{ComposeTarget, K8sTarget, TargetSpec, compose_targets, k8s_targets};
use crate::runtime::{ClusterClient, ClusterEnv, ComposeClient, K8sEntity};
use crate::state::{BuildResult, BuildResultSet, BuildStateSet};

/// The target's entities with every dependency image pointed at its result.
///
/// Entities are also labelled so pod watches can find them.
pub fn inject_images(target: &K8sTarget, images: &BuildResultSet) -> Vec<K8sEntity> {
  let mut entities = target.entities.clone();
  for entity in &mut entities {
    entity.inject_label(MANAGED_BY_LABEL, MANAGED_BY_VALUE);
  }
  for dep in &target.dependency_ids {
    let Some(image) = images.image(dep) else {
      continue;
    };
    let replaced: usize = entities.iter_mut().map(|e| e.inject_image(image)).sum();
    debug!(target = %target.id(), image = %image, replaced, "injected image");
  }
  entities
}

/// Full image builds followed by a Kubernetes deploy.
pub struct ImageBuildAndDeployer {
  builder: ImageBuilder,
  cluster: Arc<dyn ClusterClient>,
  env: ClusterEnv,
}

impl ImageBuildAndDeployer {
  pub fn new(builder: ImageBuilder, cluster: Arc<dyn ClusterClient>, env: ClusterEnv) -> Self {
    Self { builder, cluster, env }
  }

  /// Build what the queue marks, then upsert each K8s target that needs it.
  pub async fn build_and_deploy(
    &self,
    specs: &[TargetSpec],
    state: &BuildStateSet,
  ) -> Result<BuildResultSet, BuildFailure> {
    let k8s = k8s_targets(specs);
    if k8s.is_empty() {
      return Err(BuildError::redirect("image build and deploy needs a Kubernetes target").into());
    }
    if !compose_targets(specs).is_empty() {
      return Err(BuildError::redirect("compose targets are deployed with compose").into());
    }

    let queue = TargetQueue::new(specs, state)?;
    let mut results = self
      .builder
      .build_images(specs, state, &queue, self.env.needs_push())
      .await?;

    for target in k8s {
      let id = target.id();
      if !queue.needs_build(&id)
        && let Some(prior) = state.get(&id)
      {
        results.insert(id, prior.last_result.clone());
        continue;
      }
      match self.deploy(target, &results).await {
        Ok(result) => results.insert(id, result),
        Err(error) => return Err(BuildFailure::with_partial(error, results)),
      }
    }

    Ok(results)
  }

  async fn deploy(&self, target: &K8sTarget, images: &BuildResultSet) -> Result<BuildResult, BuildError> {
    let entities = inject_images(target, images);
    let deployed = self
      .cluster
      .upsert(entities)
      .await
      .map_err(|e| BuildError::backend("k8s upsert", e))?;
    let uids: Vec<String> = deployed.iter().filter_map(|e| e.uid().map(String::from)).collect();
    info!(target = %target.id(), entities = deployed.len(), "deployed");
    Ok(BuildResult::deployed(uids))
  }
}

/// Local image builds followed by `compose up`.
pub struct ComposeBuildAndDeployer {
  builder: ImageBuilder,
  compose: Arc<dyn ComposeClient>,
}

impl ComposeBuildAndDeployer {
  pub fn new(builder: ImageBuilder, compose: Arc<dyn ComposeClient>) -> Self {
    Self { builder, compose }
  }

  /// Build images for compose targets and bring their services up.
  ///
  /// Images are never pushed; compose runs on the local runtime.
  pub async fn build_and_deploy(
    &self,
    specs: &[TargetSpec],
    state: &BuildStateSet,
  ) -> Result<BuildResultSet, BuildFailure> {
    let targets = compose_targets(specs);
    if targets.is_empty() {
      return Err(BuildError::redirect("compose build and deploy needs a compose target").into());
    }

    let queue = TargetQueue::new(specs, state)?;
    let mut results = self.builder.build_images(specs, state, &queue, false).await?;

    for target in targets {
      let id = target.id();
      if !queue.needs_build(&id)
        && let Some(prior) = state.get(&id)
      {
        results.insert(id, prior.last_result.clone());
        continue;
      }
      match self.up(target).await {
        Ok(result) => results.insert(id, result),
        Err(error) => return Err(BuildFailure::with_partial(error, results)),
      }
    }

    Ok(results)
  }

  async fn up(&self, target: &ComposeTarget) -> Result<BuildResult, BuildError> {
    self
      .compose
      .up(&target.config_paths, &target.service)
      .await
      .map_err(|e| BuildError::backend("compose up", e))?;
    info!(target = %target.id(), service = %target.service, "compose service up");
    Ok(BuildResult::deployed(vec![target.service.clone()]))
  }
}
