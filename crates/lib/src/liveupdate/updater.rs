//! Applying a patch plan to one running container.
//!
//! Both transports run the same step protocol: remove deleted files, copy
//! the archive, run the triggered steps in order, then restart unless the
//! target hot-reloads or a step reported the kill exit code. Only the path
//! the copy/exec/restart calls take differs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::plan::{LiveUpdatePlan, RunStepFailure};
use crate::build::BuildError;
use crate::consts::BUILD_LOG_TARGET;
use crate::model::{Cmd, ContainerId};
use crate::runtime::{AgentManager, ContainerRuntime, ExecOutput, RuntimeError};
use crate::state::ContainerInfo;
use crate::sync::SyncArchive;

/// The copy/exec/restart triad a transport provides.
#[async_trait]
pub trait ContainerOps: Send + Sync {
  async fn copy(&self, container: &ContainerInfo, archive: Vec<u8>) -> Result<(), RuntimeError>;

  async fn exec(&self, container: &ContainerInfo, cmd: &Cmd) -> Result<ExecOutput, RuntimeError>;

  async fn restart(&self, container: &ContainerInfo) -> Result<(), RuntimeError>;
}

/// Talks to the local container runtime directly.
pub struct DirectOps {
  runtime: Arc<dyn ContainerRuntime>,
}

#[async_trait]
impl ContainerOps for DirectOps {
  async fn copy(&self, container: &ContainerInfo, archive: Vec<u8>) -> Result<(), RuntimeError> {
    self.runtime.copy_to_container_root(&container.container_id, archive).await
  }

  async fn exec(&self, container: &ContainerInfo, cmd: &Cmd) -> Result<ExecOutput, RuntimeError> {
    self.runtime.exec_in_container(&container.container_id, cmd, None).await
  }

  async fn restart(&self, container: &ContainerInfo) -> Result<(), RuntimeError> {
    self.runtime.restart_container_no_wait(&container.container_id).await
  }
}

/// Goes through the agent running in the container's pod.
///
/// A transport error drops the pod's cached connection, so the next call
/// reconnects.
pub struct AgentOps {
  agents: Arc<AgentManager>,
}

impl AgentOps {
  async fn checked<T>(&self, container: &ContainerInfo, result: Result<T, RuntimeError>) -> Result<T, RuntimeError> {
    if let Err(e) = &result {
      debug!(pod = %container.pod_id, error = %e, "dropping agent connection");
      self.agents.forget(&container.pod_id).await;
    }
    result
  }
}

#[async_trait]
impl ContainerOps for AgentOps {
  async fn copy(&self, container: &ContainerInfo, archive: Vec<u8>) -> Result<(), RuntimeError> {
    let client = self.agents.client_for(&container.pod_id, &container.namespace).await?;
    let result = client.copy_to_container_root(&container.container_id, archive).await;
    self.checked(container, result).await
  }

  async fn exec(&self, container: &ContainerInfo, cmd: &Cmd) -> Result<ExecOutput, RuntimeError> {
    let client = self.agents.client_for(&container.pod_id, &container.namespace).await?;
    let result = client.exec_in_container(&container.container_id, cmd).await;
    self.checked(container, result).await
  }

  async fn restart(&self, container: &ContainerInfo) -> Result<(), RuntimeError> {
    let client = self.agents.client_for(&container.pod_id, &container.namespace).await?;
    let result = client.restart_container(&container.container_id).await;
    self.checked(container, result).await
  }
}

/// How a successful patch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
  Restarted,
  /// The target hot-reloads, so no restart was issued.
  HotReloaded,
  /// A run step reported the kill exit code; the process is relaunched externally.
  Killed,
}

/// Result of patching one container.
#[derive(Debug)]
pub struct PatchReport {
  /// The archive reached the container, so its files are updated even if a
  /// later step failed.
  pub copied: bool,
  pub outcome: Result<PatchOutcome, BuildError>,
}

impl PatchReport {
  fn failed(copied: bool, error: BuildError) -> Self {
    Self {
      copied,
      outcome: Err(error),
    }
  }
}

/// A container update transport.
pub enum ContainerUpdater {
  Direct(DirectOps),
  Agent(AgentOps),
}

impl ContainerUpdater {
  pub fn direct(runtime: Arc<dyn ContainerRuntime>) -> Self {
    ContainerUpdater::Direct(DirectOps { runtime })
  }

  pub fn agent(agents: Arc<AgentManager>) -> Self {
    ContainerUpdater::Agent(AgentOps { agents })
  }

  pub fn name(&self) -> &'static str {
    match self {
      ContainerUpdater::Direct(_) => "exec",
      ContainerUpdater::Agent(_) => "agent",
    }
  }

  fn ops(&self) -> &dyn ContainerOps {
    match self {
      ContainerUpdater::Direct(ops) => ops,
      ContainerUpdater::Agent(ops) => ops,
    }
  }

  /// Apply `plan` to one container.
  ///
  /// # Arguments
  ///
  /// * `container` - The running container to patch
  /// * `plan` - Triggered run steps and hot-reload flag
  /// * `archive` - Files to copy and container paths to delete
  /// * `kill_exit_code` - Run-step exit code that means "skip restart"
  pub async fn update_container(
    &self,
    container: &ContainerInfo,
    plan: &LiveUpdatePlan,
    archive: &SyncArchive,
    kill_exit_code: i64,
  ) -> PatchReport {
    let ops = self.ops();
    let id = &container.container_id;
    let transport = |source| BuildError::ContainerUpdate {
      container: id.clone(),
      source,
    };

    if let Some(rm) = archive.delete_cmd() {
      match ops.exec(container, &rm).await {
        Ok(out) if out.success() => {}
        Ok(out) => {
          let message = format!("removing deleted files exited with code {}", out.exit_code);
          return PatchReport::failed(false, transport(RuntimeError::api("exec", message)));
        }
        Err(e) => return PatchReport::failed(false, transport(e)),
      }
    }

    if let Err(e) = ops.copy(container, archive.bytes.clone()).await {
      return PatchReport::failed(false, transport(e));
    }
    debug!(container = %id, transport = self.name(), "copied files");

    for step in &plan.runs {
      let output = match ops.exec(container, &step.cmd).await {
        Ok(output) => output,
        Err(e) => return PatchReport::failed(true, transport(e)),
      };
      log_output(id, &output);

      if output.success() {
        continue;
      }
      if output.exit_code == kill_exit_code {
        info!(container = %id, cmd = %step.cmd, "run step killed its process; skipping restart");
        return PatchReport {
          copied: true,
          outcome: Ok(PatchOutcome::Killed),
        };
      }
      return PatchReport::failed(
        true,
        BuildError::RunStep(RunStepFailure {
          container: id.clone(),
          cmd: step.cmd.clone(),
          exit_code: output.exit_code,
        }),
      );
    }

    if plan.hot_reload {
      return PatchReport {
        copied: true,
        outcome: Ok(PatchOutcome::HotReloaded),
      };
    }

    match ops.restart(container).await {
      Ok(()) => PatchReport {
        copied: true,
        outcome: Ok(PatchOutcome::Restarted),
      },
      Err(e) => PatchReport::failed(true, transport(e)),
    }
  }
}

fn log_output(container: &ContainerId, output: &ExecOutput) {
  for line in output.stdout.lines().chain(output.stderr.lines()) {
    info!(target: BUILD_LOG_TARGET, container = %container, "{line}");
  }
}
