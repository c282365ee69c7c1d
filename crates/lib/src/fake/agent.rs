use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::FakeRuntime;
use crate::model::{Cmd, ContainerId, PodId};
use crate::runtime::{AgentClient, AgentConnector, ContainerRuntime, ExecOutput, RuntimeError};

/// An agent client that forwards to a [`FakeRuntime`] and counts calls.
pub struct FakeAgentClient {
  runtime: Arc<FakeRuntime>,
  calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AgentClient for FakeAgentClient {
  async fn copy_to_container_root(&self, id: &ContainerId, archive: Vec<u8>) -> Result<(), RuntimeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.runtime.copy_to_container_root(id, archive).await
  }

  async fn exec_in_container(&self, id: &ContainerId, cmd: &Cmd) -> Result<ExecOutput, RuntimeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.runtime.exec_in_container(id, cmd, None).await
  }

  async fn restart_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.runtime.restart_container_no_wait(id).await
  }
}

/// Connects to [`FakeAgentClient`]s backed by one shared runtime.
pub struct FakeAgentConnector {
  runtime: Arc<FakeRuntime>,
  connects: AtomicUsize,
  calls: Arc<AtomicUsize>,
}

impl FakeAgentConnector {
  pub fn new(runtime: Arc<FakeRuntime>) -> Self {
    Self {
      runtime,
      connects: AtomicUsize::new(0),
      calls: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn connect_count(&self) -> usize {
    self.connects.load(Ordering::SeqCst)
  }

  /// Copy, exec and restart calls made through any connection.
  pub fn call_count(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl AgentConnector for FakeAgentConnector {
  async fn connect(&self, _pod: &PodId, _namespace: &str) -> Result<Arc<dyn AgentClient>, RuntimeError> {
    self.connects.fetch_add(1, Ordering::SeqCst);
    Ok(Arc::new(FakeAgentClient {
      runtime: self.runtime.clone(),
      calls: self.calls.clone(),
    }))
  }
}
