//! Shared fixtures for library integration tests.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use devloop_lib::build::{Backends, CompositeBuildAndDeployer};
use devloop_lib::config::EngineConfig;
use devloop_lib::fake::{FakeCluster, FakeCompose, FakeRuntime};
use devloop_lib::model::{
  Cmd, DockerBuild, ImageRef, ImageTarget, K8sTarget, LiveUpdate, PathSet, RunStep, SyncRule, TargetId,
};
use devloop_lib::runtime::{ClusterEnv, K8sEntity};
use devloop_lib::state::{BuildResult, BuildState, ContainerInfo};
use serde_json::json;
use tempfile::TempDir;

/// The tag every fake build produces.
pub const EXAMPLE_TAG: &str = "tilt-11cd0b38bc3ceb95";

pub fn write_file(path: &Path, contents: &str) {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, contents).unwrap();
}

/// A source tree with `a.txt` and `b.txt` under `src/`.
pub struct Project {
  _temp: TempDir,
  pub src: PathBuf,
}

impl Project {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_file(&src.join("a.txt"), "a");
    write_file(&src.join("b.txt"), "b");
    write_file(&src.join("main.go"), "package main");
    Self { _temp: temp, src }
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.src.join(relative)
  }

  /// An image target with no live update.
  pub fn image(&self, name: &str, dockerfile: &str) -> ImageTarget {
    ImageTarget::new(
      name,
      DockerBuild {
        dockerfile: dockerfile.to_string(),
        context: self.src.clone(),
        build_args: Default::default(),
      },
    )
  }

  /// Syncs `src -> /app`, runs `echo a` on `a.txt` and `echo b` on `b.txt`.
  pub fn live_update(&self) -> LiveUpdate {
    LiveUpdate {
      syncs: vec![SyncRule::new(&self.src, "/app")],
      runs: vec![
        RunStep::with_triggers(Cmd::shell("echo a"), PathSet::new(&self.src, ["a.txt"])),
        RunStep::with_triggers(Cmd::shell("echo b"), PathSet::new(&self.src, ["b.txt"])),
      ],
      ..Default::default()
    }
  }

  pub fn live_image(&self, name: &str) -> ImageTarget {
    self.image(name, "FROM alpine").with_live_update(self.live_update())
  }

  /// State of an already deployed image with the given files changed.
  pub fn deployed_image(&self, name: &str, files: &[&str], containers: &[&str]) -> BuildState {
    BuildState::new(
      BuildResult::image(ImageRef::new(name, "tilt-1111111111111111")),
      files.iter().map(|f| self.path(f)),
    )
    .with_running_containers(containers.iter().map(|c| container(c)).collect())
  }
}

pub fn container(id: &str) -> ContainerInfo {
  ContainerInfo::new(&format!("pod-{id}"), id, "app", "default")
}

pub fn deployment(name: &str, image: &str) -> K8sTarget {
  K8sTarget {
    name: name.to_string(),
    entities: vec![K8sEntity(json!({
      "apiVersion": "apps/v1",
      "kind": "Deployment",
      "metadata": { "name": name },
      "spec": { "template": { "spec": { "containers": [{ "name": "app", "image": image }] } } }
    }))],
    dependency_ids: vec![TargetId::image(image)],
  }
}

/// State of a deploy target that is up to date.
pub fn deployed() -> BuildState {
  BuildState::new(BuildResult::deployed(vec!["uid-0".to_string()]), [])
}

pub struct Harness {
  pub runtime: Arc<FakeRuntime>,
  pub cluster: Arc<FakeCluster>,
  pub compose: Arc<FakeCompose>,
}

impl Harness {
  pub fn new() -> Self {
    Self {
      runtime: Arc::new(FakeRuntime::new()),
      cluster: Arc::new(FakeCluster::new()),
      compose: Arc::new(FakeCompose::new()),
    }
  }

  pub fn backends(&self) -> Backends {
    Backends {
      runtime: self.runtime.clone(),
      cluster: self.cluster.clone(),
      compose: self.compose.clone(),
      agents: None,
    }
  }

  pub fn chain(&self, env: ClusterEnv) -> CompositeBuildAndDeployer {
    let config = EngineConfig {
      cluster_env: env,
      ..Default::default()
    };
    CompositeBuildAndDeployer::default_chain(&self.backends(), &config)
  }
}

/// The Dockerfile carried in a build context archive.
pub fn context_dockerfile(context: &[u8]) -> String {
  let mut archive = tar::Archive::new(context);
  for entry in archive.entries().unwrap() {
    let mut entry = entry.unwrap();
    if entry.path().unwrap().as_ref() == Path::new("Dockerfile") {
      let mut contents = String::new();
      entry.read_to_string(&mut contents).unwrap();
      return contents;
    }
  }
  panic!("build context has no Dockerfile");
}
