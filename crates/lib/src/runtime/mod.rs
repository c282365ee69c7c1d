//! Narrow interfaces to the systems the engine drives.
//!
//! The engine never talks to a container runtime, a cluster, a compose
//! installation or an in-pod agent directly; it goes through these traits.
//! In-process implementations live in [`crate::fake`].

mod agent;
mod cluster;
mod container;

use thiserror::Error;

pub use agent::{AgentClient, AgentConnector, AgentManager};
pub use cluster::{ClusterClient, ClusterEnv, ComposeClient, K8sEntity, LabelSelector, PodContainer, PodEvent};
pub use container::{BuildOptions, BuildOutput, ContainerRuntime, ExecOutput, ImageInspect};

/// Errors reported by an external collaborator.
#[derive(Debug, Error)]
pub enum RuntimeError {
  /// The named object does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// The collaborator rejected or failed the call.
  #[error("{operation}: {message}")]
  Api { operation: String, message: String },

  /// Could not reach the agent in a pod.
  #[error("connecting to agent in pod {pod}: {message}")]
  Connect { pod: String, message: String },

  /// I/O error on the transport.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl RuntimeError {
  pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
    RuntimeError::Api {
      operation: operation.into(),
      message: message.into(),
    }
  }
}
