//! Tearing down deploys that a reloaded target list no longer declares.

use std::collections::HashSet;

use tracing::info;

use crate::model::{TargetId, TargetSpec};
use crate::runtime::{ClusterClient, ComposeClient, RuntimeError};

/// Delete Kubernetes entities and remove compose services for deploy targets
/// in `previous` that are missing from `current`.
///
/// Returns the ids torn down, in `previous` order.
pub async fn remove_stale_deploys(
  previous: &[TargetSpec],
  current: &[TargetSpec],
  cluster: &dyn ClusterClient,
  compose: &dyn ComposeClient,
) -> Result<Vec<TargetId>, RuntimeError> {
  let keep: HashSet<TargetId> = current.iter().map(TargetSpec::id).collect();
  let mut removed = Vec::new();

  for spec in previous.iter().filter(|s| !keep.contains(&s.id())) {
    match spec {
      TargetSpec::K8s(target) => {
        cluster.delete(target.entities.clone()).await?;
        info!(target = %target.id(), entities = target.entities.len(), "deleted entities");
      }
      TargetSpec::Compose(target) => {
        compose.rm(&target.config_paths).await?;
        info!(target = %target.id(), service = %target.service, "removed compose service");
      }
      TargetSpec::Image(_) => continue,
    }
    removed.push(spec.id());
  }

  Ok(removed)
}
