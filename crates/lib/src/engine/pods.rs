//! Tracking which containers run which image target.
//!
//! Pod events arrive one pod at a time, but a target's running-container
//! list spans every replica. [`PodTracker`] keeps the latest view of each pod
//! and reports the full list for every target an event touched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::EngineAction;
use crate::consts::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::model::{PodId, TargetId, TargetSpec, image_targets};
use crate::runtime::{AgentManager, ClusterClient, LabelSelector, PodContainer, PodEvent, RuntimeError};
use crate::state::ContainerInfo;

/// Selector matching every pod this engine deployed.
pub fn managed_selector() -> LabelSelector {
  LabelSelector::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

struct PodView {
  namespace: String,
  containers: Vec<PodContainer>,
}

/// Latest known containers per pod, grouped by image target on demand.
pub struct PodTracker {
  /// Image repository name to target.
  images: BTreeMap<String, TargetId>,
  pods: BTreeMap<PodId, PodView>,
}

impl PodTracker {
  pub fn new(specs: &[TargetSpec]) -> Self {
    let images = image_targets(specs).into_iter().map(|t| (t.name.clone(), t.id())).collect();
    Self {
      images,
      pods: BTreeMap::new(),
    }
  }

  /// Apply a pod event and report the new container list of every target
  /// whose containers it may have changed.
  pub fn observe(&mut self, event: PodEvent) -> Vec<EngineAction> {
    let mut touched = BTreeSet::new();
    if let Some(old) = self.pods.get(&event.pod_id) {
      touched.extend(self.targets_of(&old.containers));
    }

    if event.deleted {
      self.pods.remove(&event.pod_id);
    } else {
      touched.extend(self.targets_of(&event.containers));
      self.pods.insert(
        event.pod_id.clone(),
        PodView {
          namespace: event.namespace,
          containers: event.containers,
        },
      );
    }

    touched
      .into_iter()
      .map(|target| {
        let containers = self.running(&target);
        debug!(target = %target, containers = containers.len(), "observed containers");
        EngineAction::ContainersObserved { target, containers }
      })
      .collect()
  }

  /// Ready containers running the target's image, across all pods.
  pub fn running(&self, target: &TargetId) -> Vec<ContainerInfo> {
    let mut out = Vec::new();
    for (pod_id, pod) in &self.pods {
      for c in pod.containers.iter().filter(|c| c.ready) {
        if self.images.get(&c.image.name) == Some(target) {
          out.push(ContainerInfo {
            pod_id: pod_id.clone(),
            container_id: c.container_id.clone(),
            container_name: c.name.clone(),
            namespace: pod.namespace.clone(),
          });
        }
      }
    }
    out
  }

  fn targets_of(&self, containers: &[PodContainer]) -> Vec<TargetId> {
    containers
      .iter()
      .filter_map(|c| self.images.get(&c.image.name).cloned())
      .collect()
  }
}

/// Watch managed pods and forward container changes as actions.
///
/// A deleted pod's agent connection, if any, is dropped from `agents`. Runs
/// until cancelled, the pod stream ends, or the action receiver is dropped.
pub async fn forward_pod_events(
  cluster: Arc<dyn ClusterClient>,
  specs: &[TargetSpec],
  actions: mpsc::Sender<EngineAction>,
  agents: Option<Arc<AgentManager>>,
  cancel: CancellationToken,
) -> Result<(), RuntimeError> {
  let mut events = cluster.watch_pods(&managed_selector()).await?;
  let mut tracker = PodTracker::new(specs);

  loop {
    let event = tokio::select! {
      _ = cancel.cancelled() => return Ok(()),
      event = events.recv() => match event {
        Some(event) => event,
        None => return Ok(()),
      },
    };
    if event.deleted
      && let Some(agents) = &agents
    {
      agents.forget(&event.pod_id).await;
    }
    for action in tracker.observe(event) {
      if actions.send(action).await.is_err() {
        return Ok(());
      }
    }
  }
}
