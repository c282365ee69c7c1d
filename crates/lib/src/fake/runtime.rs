use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::model::{Cmd, ContainerId, ImageRef};
use crate::runtime::{BuildOptions, BuildOutput, ContainerRuntime, ExecOutput, ImageInspect, RuntimeError};

/// Digest reported by [`EXAMPLE_BUILD_OUTPUT`].
pub const EXAMPLE_DIGEST: &str = "sha256:11cd0b38bc3ceb958ffb2f9bd70be3fb317ce7d255c8a4c3f4af30e298aa1aab";

/// Short image id printed by both example outputs.
pub const EXAMPLE_SHORT_ID: &str = "11cd0b38bc3c";

/// Build output carrying the digest in an `aux` message.
pub const EXAMPLE_BUILD_OUTPUT: &str = r#"{"stream":"Step 1/1 : FROM alpine"}
{"stream":"\n"}
{"stream":" ---> 11cd0b38bc3c\n"}
{"aux":{"ID":"sha256:11cd0b38bc3ceb958ffb2f9bd70be3fb317ce7d255c8a4c3f4af30e298aa1aab"}}
{"stream":"Successfully built 11cd0b38bc3c\n"}
"#;

/// Build output from backends that only print the short id.
pub const EXAMPLE_BUILD_OUTPUT_LEGACY: &str = r#"{"stream":"Step 1/1 : FROM alpine"}
{"stream":"\n"}
{"stream":" ---> 11cd0b38bc3c\n"}
{"stream":"Successfully built 11cd0b38bc3c\n"}
"#;

enum ScriptedExec {
  Output(ExecOutput),
  Fail(String),
}

struct RuntimeState {
  copies: Vec<(ContainerId, Vec<u8>)>,
  execs: Vec<(ContainerId, Cmd)>,
  restarts: Vec<ContainerId>,
  builds: Vec<(Vec<u8>, BuildOptions)>,
  pushes: Vec<ImageRef>,
  tags: Vec<(String, ImageRef)>,
  images: HashMap<String, String>,
  exec_script: VecDeque<ScriptedExec>,
  copy_error: Option<String>,
  build_output: String,
  build_error: Option<String>,
}

impl Default for RuntimeState {
  fn default() -> Self {
    Self {
      copies: Vec::new(),
      execs: Vec::new(),
      restarts: Vec::new(),
      builds: Vec::new(),
      pushes: Vec::new(),
      tags: Vec::new(),
      images: HashMap::from([(EXAMPLE_SHORT_ID.to_string(), EXAMPLE_DIGEST.to_string())]),
      exec_script: VecDeque::new(),
      copy_error: None,
      build_output: EXAMPLE_BUILD_OUTPUT.to_string(),
      build_error: None,
    }
  }
}

/// A container runtime and build backend that records every call.
///
/// Execs succeed unless scripted otherwise; scripted results are consumed one
/// per exec call, in order.
#[derive(Default)]
pub struct FakeRuntime {
  state: Mutex<RuntimeState>,
}

impl FakeRuntime {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_build_output(&self, output: &str) {
    lock(&self.state).build_output = output.to_string();
  }

  pub fn fail_builds(&self, message: &str) {
    lock(&self.state).build_error = Some(message.to_string());
  }

  pub fn fail_copies(&self, message: &str) {
    lock(&self.state).copy_error = Some(message.to_string());
  }

  /// The next unscripted exec returns `output`.
  pub fn queue_exec_output(&self, output: ExecOutput) {
    lock(&self.state).exec_script.push_back(ScriptedExec::Output(output));
  }

  /// The next unscripted exec fails at the transport level.
  pub fn queue_exec_error(&self, message: &str) {
    lock(&self.state).exec_script.push_back(ScriptedExec::Fail(message.to_string()));
  }

  /// Make `reference` resolve to `id` on inspect.
  pub fn add_image(&self, reference: &str, id: &str) {
    lock(&self.state).images.insert(reference.to_string(), id.to_string());
  }

  pub fn copy_count(&self) -> usize {
    lock(&self.state).copies.len()
  }

  pub fn exec_count(&self) -> usize {
    lock(&self.state).execs.len()
  }

  pub fn restart_count(&self) -> usize {
    lock(&self.state).restarts.len()
  }

  pub fn build_count(&self) -> usize {
    lock(&self.state).builds.len()
  }

  pub fn push_count(&self) -> usize {
    lock(&self.state).pushes.len()
  }

  pub fn copies(&self) -> Vec<(ContainerId, Vec<u8>)> {
    lock(&self.state).copies.clone()
  }

  pub fn execs(&self) -> Vec<(ContainerId, Cmd)> {
    lock(&self.state).execs.clone()
  }

  pub fn restarts(&self) -> Vec<ContainerId> {
    lock(&self.state).restarts.clone()
  }

  pub fn builds(&self) -> Vec<(Vec<u8>, BuildOptions)> {
    lock(&self.state).builds.clone()
  }

  pub fn pushes(&self) -> Vec<ImageRef> {
    lock(&self.state).pushes.clone()
  }

  pub fn tags(&self) -> Vec<(String, ImageRef)> {
    lock(&self.state).tags.clone()
  }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
  async fn copy_to_container_root(&self, id: &ContainerId, archive: Vec<u8>) -> Result<(), RuntimeError> {
    let mut state = lock(&self.state);
    if let Some(message) = &state.copy_error {
      return Err(RuntimeError::api("copy to container", message.clone()));
    }
    state.copies.push((id.clone(), archive));
    Ok(())
  }

  async fn exec_in_container(
    &self,
    id: &ContainerId,
    cmd: &Cmd,
    _stdin: Option<Vec<u8>>,
  ) -> Result<ExecOutput, RuntimeError> {
    let mut state = lock(&self.state);
    state.execs.push((id.clone(), cmd.clone()));
    match state.exec_script.pop_front() {
      Some(ScriptedExec::Output(output)) => Ok(output),
      Some(ScriptedExec::Fail(message)) => Err(RuntimeError::api("exec", message)),
      None => Ok(ExecOutput::ok()),
    }
  }

  async fn restart_container_no_wait(&self, id: &ContainerId) -> Result<(), RuntimeError> {
    lock(&self.state).restarts.push(id.clone());
    Ok(())
  }

  async fn image_build(&self, context: Vec<u8>, options: &BuildOptions) -> Result<BuildOutput, RuntimeError> {
    let mut state = lock(&self.state);
    if let Some(message) = &state.build_error {
      return Err(RuntimeError::api("image build", message.clone()));
    }
    state.builds.push((context, options.clone()));
    Ok(Box::new(Cursor::new(state.build_output.clone().into_bytes())))
  }

  async fn image_push(&self, image: &ImageRef) -> Result<(), RuntimeError> {
    lock(&self.state).pushes.push(image.clone());
    Ok(())
  }

  async fn image_tag(&self, source: &str, target: &ImageRef) -> Result<(), RuntimeError> {
    let mut state = lock(&self.state);
    let id = state.images.get(source).cloned().unwrap_or_else(|| source.to_string());
    state.images.insert(target.to_string(), id);
    state.tags.push((source.to_string(), target.clone()));
    Ok(())
  }

  async fn image_inspect(&self, reference: &str) -> Result<ImageInspect, RuntimeError> {
    lock(&self.state)
      .images
      .get(reference)
      .map(|id| ImageInspect { id: id.clone() })
      .ok_or_else(|| RuntimeError::NotFound(reference.to_string()))
  }
}
