//! The single-flight build controller.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::build::{BuildError, CompositeBuildAndDeployer};
use crate::model::{TargetId, TargetKind, TargetSpec};
use crate::state::{BuildResultSet, BuildStateSet, ContainerInfo};
use crate::watch::WatchEvent;

/// Something that changes what the next cycle should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
  /// A watch reported a batch of changed files.
  FilesChanged { target: TargetId, files: Vec<PathBuf> },
  /// The containers currently running a target's image.
  ContainersObserved {
    target: TargetId,
    containers: Vec<ContainerInfo>,
  },
  /// A watch reported an error.
  WatchFailed { target: TargetId, message: String },
}

impl From<WatchEvent> for EngineAction {
  fn from(event: WatchEvent) -> Self {
    match event {
      WatchEvent::FilesChanged { target, files } => EngineAction::FilesChanged { target, files },
      WatchEvent::Error { target, message } => EngineAction::WatchFailed { target, message },
    }
  }
}

/// Owns the build state between cycles and runs one cycle at a time.
pub struct BuildController {
  builder: CompositeBuildAndDeployer,
  state: BuildStateSet,
  config_changes: BTreeSet<PathBuf>,
}

impl BuildController {
  pub fn new(builder: CompositeBuildAndDeployer) -> Self {
    Self {
      builder,
      state: BuildStateSet::new(),
      config_changes: BTreeSet::new(),
    }
  }

  pub fn state(&self) -> &BuildStateSet {
    &self.state
  }

  /// Apply an action to the pending state.
  ///
  /// Returns whether the action adds work for the next cycle.
  pub fn handle_action(&mut self, action: EngineAction) -> bool {
    match action {
      EngineAction::FilesChanged { target, files } if target.kind == TargetKind::Configs => {
        info!(files = files.len(), "configuration changed");
        self.config_changes.extend(files);
        false
      }
      EngineAction::FilesChanged { target, files } => {
        debug!(target = %target, files = files.len(), "recording changed files");
        self.state.record_files_changed(&target, files);
        true
      }
      EngineAction::ContainersObserved { target, containers } => {
        debug!(target = %target, containers = containers.len(), "recording running containers");
        self.state.record_running_containers(&target, containers);
        false
      }
      EngineAction::WatchFailed { target, message } => {
        warn!(target = %target, error = %message, "watch failed");
        false
      }
    }
  }

  /// Configuration files changed since the last call.
  pub fn take_config_changes(&mut self) -> Vec<PathBuf> {
    std::mem::take(&mut self.config_changes).into_iter().collect()
  }

  /// Whether any target has no result yet or has changed files.
  pub fn has_pending_work(&self, specs: &[TargetSpec]) -> bool {
    specs.iter().any(|s| self.state.is_dirty(&s.id()))
  }

  /// Run one cycle against a snapshot of the current state.
  ///
  /// On success the state advances to include the results. On failure the
  /// changed files stay pending and only containers that were actually
  /// patched are recorded.
  pub async fn run_cycle(&mut self, specs: &[TargetSpec]) -> Result<BuildResultSet, BuildError> {
    let snapshot = self.state.clone();
    info!(targets = specs.len(), "starting build cycle");

    match self.builder.build_and_deploy(specs, &snapshot).await {
      Ok(results) => {
        self.state = snapshot.advance(&results);
        info!(targets = results.len(), "build cycle succeeded");
        Ok(results)
      }
      Err(failure) => {
        self.state = snapshot.record_partial(&failure.partial);
        error!(error = %failure.error, "build cycle failed");
        Err(failure.error)
      }
    }
  }

  /// Process actions and run cycles until cancelled, the action channel
  /// closes, or configuration files change.
  ///
  /// After a failed cycle, no new cycle starts until files change again.
  /// Returning on a configuration change leaves the state in place, so the
  /// caller can reload its targets and call `run` again.
  pub async fn run(
    &mut self,
    specs: &[TargetSpec],
    actions: &mut mpsc::Receiver<EngineAction>,
    cancel: &CancellationToken,
  ) -> RunExit {
    let mut blocked = false;

    let exit = loop {
      if !blocked && self.has_pending_work(specs) {
        let outcome = tokio::select! {
          _ = cancel.cancelled() => break RunExit::Stopped,
          outcome = self.run_cycle(specs) => outcome,
        };
        // A successful cycle that left work behind would only repeat itself.
        blocked = outcome.is_err() || self.has_pending_work(specs);
        continue;
      }

      let action = tokio::select! {
        _ = cancel.cancelled() => break RunExit::Stopped,
        action = actions.recv() => match action {
          Some(action) => action,
          None => break RunExit::Stopped,
        },
      };
      if self.handle_action(action) {
        blocked = false;
      }
      while let Ok(action) = actions.try_recv() {
        if self.handle_action(action) {
          blocked = false;
        }
      }

      let changed = self.take_config_changes();
      if !changed.is_empty() {
        break RunExit::ConfigChanged(changed);
      }
    };

    debug!(exit = ?exit, "build controller stopped");
    exit
  }

  pub fn into_state(self) -> BuildStateSet {
    self.state
  }
}

/// Why [`BuildController::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
  /// Cancelled, or every action sender is gone.
  Stopped,
  /// These configuration files changed.
  ConfigChanged(Vec<PathBuf>),
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::{BuildAndDeployer, ComposeBuildAndDeployer, ImageBuilder};
  use crate::config::EngineConfig;
  use crate::fake::{FakeCompose, FakeRuntime};
  use crate::model::{ComposeTarget, DockerBuild, ImageTarget};
  use crate::util::testutil::write_file;
  use std::sync::Arc;
  use tempfile::TempDir;

  fn compose_specs(dir: &TempDir) -> Vec<TargetSpec> {
    write_file(&dir.path().join("main.go"), "package main");
    let image = ImageTarget::new(
      "web",
      DockerBuild {
        dockerfile: "FROM golang".to_string(),
        context: dir.path().to_path_buf(),
        build_args: Default::default(),
      },
    );
    vec![
      TargetSpec::Compose(ComposeTarget {
        name: "web".to_string(),
        config_paths: vec![dir.path().join("docker-compose.yml")],
        service: "web".to_string(),
        dependency_ids: vec![image.id()],
      }),
      TargetSpec::Image(image),
    ]
  }

  fn controller(runtime: Arc<FakeRuntime>, compose: Arc<FakeCompose>) -> BuildController {
    BuildController::new(CompositeBuildAndDeployer::new(vec![BuildAndDeployer::Compose(
      ComposeBuildAndDeployer::new(ImageBuilder::new(runtime, &EngineConfig::default()), compose),
    )]))
  }

  #[test]
  fn watch_events_become_actions() {
    let action = EngineAction::from(WatchEvent::FilesChanged {
      target: TargetId::image("web"),
      files: vec![PathBuf::from("/src/a.txt")],
    });
    assert!(matches!(action, EngineAction::FilesChanged { .. }));
  }

  #[test]
  fn config_changes_are_kept_apart_from_build_state() {
    let mut c = controller(Arc::new(FakeRuntime::new()), Arc::new(FakeCompose::new()));
    let new_work = c.handle_action(EngineAction::FilesChanged {
      target: TargetId::configs(),
      files: vec![PathBuf::from("/src/devloop.json")],
    });
    assert!(!new_work);
    assert!(c.state().is_empty());
    assert_eq!(c.take_config_changes(), vec![PathBuf::from("/src/devloop.json")]);
    assert!(c.take_config_changes().is_empty());
  }

  #[tokio::test]
  async fn successful_cycle_clears_changed_files() {
    let dir = TempDir::new().unwrap();
    let specs = compose_specs(&dir);
    let runtime = Arc::new(FakeRuntime::new());
    let mut c = controller(runtime.clone(), Arc::new(FakeCompose::new()));

    c.handle_action(EngineAction::ContainersObserved {
      target: TargetId::image("web"),
      containers: vec![ContainerInfo::new("pod-1", "c-1", "web", "default")],
    });
    assert!(c.has_pending_work(&specs));
    c.run_cycle(&specs).await.unwrap();
    assert!(!c.has_pending_work(&specs));

    c.handle_action(EngineAction::FilesChanged {
      target: TargetId::image("web"),
      files: vec![dir.path().join("main.go")],
    });
    assert!(c.has_pending_work(&specs));
    c.run_cycle(&specs).await.unwrap();
    assert!(!c.has_pending_work(&specs));
    assert_eq!(runtime.build_count(), 2);
  }

  #[tokio::test]
  async fn failed_cycle_keeps_changed_files() {
    let dir = TempDir::new().unwrap();
    let specs = compose_specs(&dir);
    let runtime = Arc::new(FakeRuntime::new());
    let mut c = controller(runtime.clone(), Arc::new(FakeCompose::new()));
    c.run_cycle(&specs).await.unwrap();

    runtime.fail_builds("daemon unavailable");
    c.handle_action(EngineAction::FilesChanged {
      target: TargetId::image("web"),
      files: vec![dir.path().join("main.go")],
    });
    let err = c.run_cycle(&specs).await.unwrap_err();

    assert!(matches!(err, BuildError::Backend { .. }));
    assert!(c.state().get(&TargetId::image("web")).unwrap().has_changed_files());
  }

  fn spawn_run(
    mut c: BuildController,
    specs: Vec<TargetSpec>,
    mut rx: mpsc::Receiver<EngineAction>,
    cancel: CancellationToken,
  ) -> tokio::task::JoinHandle<(RunExit, BuildStateSet)> {
    tokio::spawn(async move {
      let exit = c.run(&specs, &mut rx, &cancel).await;
      (exit, c.into_state())
    })
  }

  #[tokio::test]
  async fn run_builds_until_actions_close() {
    let dir = TempDir::new().unwrap();
    let specs = compose_specs(&dir);
    let runtime = Arc::new(FakeRuntime::new());
    let compose = Arc::new(FakeCompose::new());
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    let handle = spawn_run(controller(runtime.clone(), compose.clone()), specs, rx, cancel.clone());

    tx.send(EngineAction::FilesChanged {
      target: TargetId::image("web"),
      files: vec![dir.path().join("main.go")],
    })
    .await
    .unwrap();
    drop(tx);

    let (exit, state) = handle.await.unwrap();
    assert_eq!(exit, RunExit::Stopped);
    assert_eq!(compose.up_calls().len(), 2);
    assert!(!state.get(&TargetId::image("web")).unwrap().has_changed_files());
    assert!(!cancel.is_cancelled());
  }

  #[tokio::test]
  async fn cancel_stops_an_idle_controller() {
    let dir = TempDir::new().unwrap();
    let specs = compose_specs(&dir);
    let (_tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let c = controller(Arc::new(FakeRuntime::new()), Arc::new(FakeCompose::new()));

    let handle = spawn_run(c, specs, rx, cancel.clone());
    cancel.cancel();
    assert_eq!(handle.await.unwrap().0, RunExit::Stopped);
  }

  #[tokio::test]
  async fn config_change_returns_with_state_kept() {
    let dir = TempDir::new().unwrap();
    let specs = compose_specs(&dir);
    let compose = Arc::new(FakeCompose::new());
    let mut c = controller(Arc::new(FakeRuntime::new()), compose.clone());
    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    tx.send(EngineAction::FilesChanged {
      target: TargetId::configs(),
      files: vec![dir.path().join("devloop.json")],
    })
    .await
    .unwrap();
    let exit = c.run(&specs, &mut rx, &cancel).await;

    assert_eq!(exit, RunExit::ConfigChanged(vec![dir.path().join("devloop.json")]));
    assert_eq!(compose.up_calls().len(), 1);
    assert!(c.take_config_changes().is_empty());

    // Running again with the same targets finds nothing left to do.
    drop(tx);
    assert_eq!(c.run(&specs, &mut rx, &cancel).await, RunExit::Stopped);
    assert_eq!(compose.up_calls().len(), 1);
    assert!(!c.into_state().is_empty());
  }
}
