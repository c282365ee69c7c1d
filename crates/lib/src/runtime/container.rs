//! The local container runtime and image build backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufRead;

use super::RuntimeError;
use crate::consts::DOCKERFILE_NAME;
use crate::model::{Cmd, ContainerId, ImageRef};

/// Streamed build output, one JSON message per line.
pub type BuildOutput = Box<dyn AsyncBufRead + Send + Unpin>;

/// Result of a command executed inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
  pub exit_code: i64,
  pub stdout: String,
  pub stderr: String,
}

impl ExecOutput {
  pub fn ok() -> Self {
    Self::default()
  }

  pub fn exit(code: i64) -> Self {
    Self {
      exit_code: code,
      ..Default::default()
    }
  }

  pub fn success(&self) -> bool {
    self.exit_code == 0
  }
}

/// Options forwarded to the build backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
  /// Dockerfile path inside the context.
  pub dockerfile: String,
  pub build_args: BTreeMap<String, String>,
  /// Remove intermediate containers after a successful build.
  pub remove_intermediate: bool,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      dockerfile: DOCKERFILE_NAME.to_string(),
      build_args: BTreeMap::new(),
      remove_intermediate: true,
    }
  }
}

/// What the runtime knows about an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInspect {
  /// Content digest, e.g. `sha256:...`.
  pub id: String,
}

/// Container runtime operations the engine needs.
///
/// Exec reports non-zero exits through [`ExecOutput::exit_code`]; an `Err`
/// means the call itself failed.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
  async fn copy_to_container_root(&self, id: &ContainerId, archive: Vec<u8>) -> Result<(), RuntimeError>;

  async fn exec_in_container(
    &self,
    id: &ContainerId,
    cmd: &Cmd,
    stdin: Option<Vec<u8>>,
  ) -> Result<ExecOutput, RuntimeError>;

  /// Restart the container's main process, keeping the container itself.
  async fn restart_container_no_wait(&self, id: &ContainerId) -> Result<(), RuntimeError>;

  async fn image_build(&self, context: Vec<u8>, options: &BuildOptions) -> Result<BuildOutput, RuntimeError>;

  async fn image_push(&self, image: &ImageRef) -> Result<(), RuntimeError>;

  /// Point `target` at the image named by `source` (an id or reference).
  async fn image_tag(&self, source: &str, target: &ImageRef) -> Result<(), RuntimeError>;

  async fn image_inspect(&self, reference: &str) -> Result<ImageInspect, RuntimeError>;
}
