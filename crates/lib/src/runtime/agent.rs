//! The in-pod agent used to update containers on remote clusters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ExecOutput, RuntimeError};
use crate::model::{Cmd, ContainerId, PodId};

/// Copy, exec and restart, served by an agent running next to the container.
#[async_trait]
pub trait AgentClient: Send + Sync {
  async fn copy_to_container_root(&self, id: &ContainerId, archive: Vec<u8>) -> Result<(), RuntimeError>;

  async fn exec_in_container(&self, id: &ContainerId, cmd: &Cmd) -> Result<ExecOutput, RuntimeError>;

  async fn restart_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;
}

/// Opens a connection to the agent in a pod.
#[async_trait]
pub trait AgentConnector: Send + Sync {
  async fn connect(&self, pod: &PodId, namespace: &str) -> Result<Arc<dyn AgentClient>, RuntimeError>;
}

/// Keeps one long-lived agent connection per pod.
pub struct AgentManager {
  connector: Arc<dyn AgentConnector>,
  clients: Mutex<HashMap<PodId, Arc<dyn AgentClient>>>,
}

impl AgentManager {
  pub fn new(connector: Arc<dyn AgentConnector>) -> Self {
    Self {
      connector,
      clients: Mutex::new(HashMap::new()),
    }
  }

  /// The client for `pod`, connecting on first use.
  pub async fn client_for(&self, pod: &PodId, namespace: &str) -> Result<Arc<dyn AgentClient>, RuntimeError> {
    let mut clients = self.clients.lock().await;
    if let Some(client) = clients.get(pod) {
      return Ok(client.clone());
    }
    debug!(pod = %pod, namespace, "connecting to agent");
    let client = self.connector.connect(pod, namespace).await?;
    clients.insert(pod.clone(), client.clone());
    Ok(client)
  }

  /// Drop the cached connection to `pod`, e.g. after the pod went away.
  pub async fn forget(&self, pod: &PodId) {
    self.clients.lock().await.remove(pod);
  }
}
