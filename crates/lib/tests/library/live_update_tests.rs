use std::sync::Arc;

use devloop_lib::build::{Backends, CompositeBuildAndDeployer};
use devloop_lib::config::EngineConfig;
use devloop_lib::fake::FakeAgentConnector;
use devloop_lib::model::{ContainerId, TargetId, TargetSpec};
use devloop_lib::runtime::{AgentManager, ClusterEnv, ExecOutput};
use devloop_lib::state::{BuildResult, BuildStateSet};

use super::common::{Harness, Project, deployed, deployment};

fn single_target(project: &Project, files: &[&str]) -> (Vec<TargetSpec>, BuildStateSet) {
  let image = project.live_image("gcr.io/foo");
  let k8s = deployment("foo", "gcr.io/foo");
  let state = BuildStateSet::new()
    .with(image.id(), project.deployed_image("gcr.io/foo", files, &["c-1"]))
    .with(k8s.id(), deployed());
  (vec![TargetSpec::Image(image), TargetSpec::K8s(k8s)], state)
}

#[tokio::test]
async fn killed_run_step_skips_the_restart() {
  let project = Project::new();
  let harness = Harness::new();
  harness.runtime.queue_exec_output(ExecOutput::exit(137));
  let (specs, state) = single_target(&project, &["a.txt", "b.txt"]);

  let results = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  assert_eq!(harness.runtime.exec_count(), 1);
  assert_eq!(harness.runtime.restart_count(), 0);
  assert_eq!(results.live_updated_container_ids(), vec![ContainerId::from("c-1")]);
}

#[tokio::test]
async fn kill_exit_code_is_configurable() {
  let project = Project::new();
  let harness = Harness::new();
  harness.runtime.queue_exec_output(ExecOutput::exit(42));
  let (specs, state) = single_target(&project, &["a.txt"]);
  let config = EngineConfig {
    cluster_env: ClusterEnv::DockerDesktop,
    kill_exit_code: 42,
    ..Default::default()
  };

  CompositeBuildAndDeployer::default_chain(&harness.backends(), &config)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  assert_eq!(harness.runtime.restart_count(), 0);
  assert_eq!(harness.runtime.build_count(), 0);
}

#[tokio::test]
async fn hot_reload_leaves_the_process_running() {
  let project = Project::new();
  let harness = Harness::new();
  let (mut specs, state) = single_target(&project, &["b.txt"]);
  if let TargetSpec::Image(image) = &mut specs[0]
    && let Some(lu) = image.live_update.as_mut()
  {
    lu.hot_reload = true;
  }

  harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  assert_eq!(harness.runtime.copy_count(), 1);
  assert_eq!(harness.runtime.execs()[0].1.to_string(), "echo b");
  assert_eq!(harness.runtime.restart_count(), 0);
}

#[tokio::test]
async fn deleted_files_are_removed_before_run_steps() {
  let project = Project::new();
  let harness = Harness::new();
  std::fs::remove_file(project.path("a.txt")).unwrap();
  let (specs, state) = single_target(&project, &["a.txt"]);

  harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  let execs: Vec<String> = harness.runtime.execs().iter().map(|(_, cmd)| cmd.to_string()).collect();
  assert_eq!(execs, vec!["rm -rf /app/a.txt", "echo a"]);
  assert_eq!(harness.runtime.restart_count(), 1);
}

#[tokio::test]
async fn remote_clusters_patch_through_one_agent_connection() {
  let project = Project::new();
  let harness = Harness::new();
  let connector = Arc::new(FakeAgentConnector::new(harness.runtime.clone()));
  let backends = Backends {
    agents: Some(Arc::new(AgentManager::new(connector.clone()))),
    ..harness.backends()
  };
  let config = EngineConfig {
    cluster_env: ClusterEnv::Gke,
    ..Default::default()
  };
  let chain = CompositeBuildAndDeployer::default_chain(&backends, &config);
  let (specs, state) = single_target(&project, &["a.txt"]);

  chain.build_and_deploy(&specs, &state).await.unwrap();
  let (specs, state) = single_target(&project, &["b.txt"]);
  chain.build_and_deploy(&specs, &state).await.unwrap();

  assert_eq!(connector.connect_count(), 1);
  assert_eq!(connector.call_count(), 6);
  assert_eq!(harness.runtime.copy_count(), 2);
}

#[tokio::test]
async fn base_image_changes_are_synced_and_the_base_is_invalidated() {
  let project = Project::new();
  let harness = Harness::new();
  let base = project.image("gcr.io/base", "FROM alpine");
  let app = project
    .image("gcr.io/app", "FROM gcr.io/base")
    .with_live_update(project.live_update())
    .with_dependencies([base.id()]);
  let k8s = deployment("app", "gcr.io/app");
  let state = BuildStateSet::new()
    .with(base.id(), project.deployed_image("gcr.io/base", &["b.txt"], &[]))
    .with(app.id(), project.deployed_image("gcr.io/app", &[], &["c-1"]))
    .with(k8s.id(), deployed());
  let specs = vec![TargetSpec::Image(base), TargetSpec::Image(app), TargetSpec::K8s(k8s)];

  let results = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  assert_eq!(harness.runtime.execs()[0].1.to_string(), "echo b");
  assert_eq!(results.get(&TargetId::image("gcr.io/base")), Some(&BuildResult::default()));
  assert_eq!(
    results.get(&TargetId::image("gcr.io/app")).unwrap().live_updated_container_ids,
    vec![ContainerId::from("c-1")]
  );
}
