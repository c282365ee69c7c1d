use devloop_lib::build::BuildError;
use devloop_lib::liveupdate::Ineligible;
use devloop_lib::model::{ContainerId, PathSet, TargetSpec};
use devloop_lib::runtime::{ClusterEnv, ExecOutput};
use devloop_lib::state::BuildStateSet;

use super::common::{EXAMPLE_TAG, Harness, Project, deployed, deployment};

#[tokio::test]
async fn live_update_patches_the_running_container() {
  let project = Project::new();
  let harness = Harness::new();
  let image = project.live_image("gcr.io/foo");
  let k8s = deployment("foo", "gcr.io/foo");
  let state = BuildStateSet::new()
    .with(image.id(), project.deployed_image("gcr.io/foo", &["a.txt"], &["c-1"]))
    .with(k8s.id(), deployed());
  let specs = vec![TargetSpec::Image(image), TargetSpec::K8s(k8s)];

  let results = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  assert_eq!(harness.runtime.copy_count(), 1);
  assert_eq!(harness.runtime.exec_count(), 1);
  assert_eq!(harness.runtime.execs()[0].1.to_string(), "echo a");
  assert_eq!(harness.runtime.restart_count(), 1);
  assert_eq!(harness.runtime.build_count(), 0);
  assert_eq!(harness.cluster.upsert_count(), 0);
  assert_eq!(results.live_updated_container_ids(), vec![ContainerId::from("c-1")]);
}

#[tokio::test]
async fn unsynced_file_falls_back_to_a_full_build() {
  let project = Project::new();
  let harness = Harness::new();
  let image = project.live_image("gcr.io/foo");
  let k8s = deployment("foo", "gcr.io/foo");
  let mut image_state = project.deployed_image("gcr.io/foo", &["a.txt"], &["c-1"]);
  image_state.add_files_changed([project.src.parent().unwrap().join("Makefile")]);
  let state = BuildStateSet::new()
    .with(image.id(), image_state)
    .with(k8s.id(), deployed());
  let specs = vec![TargetSpec::Image(image.clone()), TargetSpec::K8s(k8s.clone())];

  let results = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  assert_eq!(harness.runtime.copy_count() + harness.runtime.exec_count(), 0);
  assert_eq!(harness.runtime.build_count(), 1);
  assert_eq!(harness.cluster.upsert_count(), 1);
  assert_eq!(results.image(&image.id()).map(|r| r.tag.as_str()), Some(EXAMPLE_TAG));
  assert!(!results.get(&k8s.id()).unwrap().deployed_uids.is_empty());
  assert!(results.live_updated_container_ids().is_empty());
}

#[tokio::test]
async fn failed_run_step_still_reports_every_patched_container() {
  let project = Project::new();
  let harness = Harness::new();
  harness.runtime.queue_exec_output(ExecOutput::exit(1));
  let image = project.live_image("gcr.io/foo");
  let state = BuildStateSet::new().with(
    image.id(),
    project.deployed_image("gcr.io/foo", &["a.txt"], &["c-1", "c-2"]),
  );
  let specs = vec![TargetSpec::Image(image)];

  let failure = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap_err();

  assert!(matches!(failure.error, BuildError::RunStep(_)));
  assert_eq!(
    failure.error.to_string(),
    "Run step \"echo a\" failed with exit code: 1"
  );
  assert_eq!(harness.runtime.copy_count(), 2);
  assert_eq!(harness.runtime.restarts(), vec![ContainerId::from("c-2")]);
  assert_eq!(
    failure.partial.live_updated_container_ids(),
    vec![ContainerId::from("c-1"), ContainerId::from("c-2")]
  );
}

#[tokio::test]
async fn failed_run_step_falls_back_to_image_build_from_the_same_snapshot() {
  let project = Project::new();
  let harness = Harness::new();
  harness.runtime.queue_exec_output(ExecOutput::exit(1));
  let image = project.live_image("gcr.io/foo");
  let k8s = deployment("foo", "gcr.io/foo");
  let state = BuildStateSet::new()
    .with(image.id(), project.deployed_image("gcr.io/foo", &["a.txt"], &["c-1", "c-2"]))
    .with(k8s.id(), deployed());
  let before = serde_json::to_vec(&state).unwrap();
  let specs = vec![TargetSpec::Image(image.clone()), TargetSpec::K8s(k8s.clone())];

  let results = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  // Live update reached both containers before giving up.
  assert_eq!(harness.runtime.copy_count(), 2);
  assert_eq!(harness.runtime.build_count(), 1);
  assert_eq!(harness.cluster.upsert_count(), 1);
  assert_eq!(
    harness.cluster.last_upserted()[0].images(),
    vec![format!("gcr.io/foo:{EXAMPLE_TAG}")]
  );
  assert_eq!(results.image(&image.id()).map(|r| r.tag.as_str()), Some(EXAMPLE_TAG));
  assert!(results.live_updated_container_ids().is_empty());
  assert_eq!(results.get(&k8s.id()).unwrap().deployed_uids, vec!["uid-1"]);
  assert_eq!(serde_json::to_vec(&state).unwrap(), before);
}

#[tokio::test]
async fn fall_back_on_file_skips_live_update() {
  let project = Project::new();
  let harness = Harness::new();
  let mut image = project.live_image("gcr.io/foo");
  if let Some(lu) = image.live_update.as_mut() {
    lu.fall_back_on = PathSet::new(&project.src, ["main.go"]);
  }
  let k8s = deployment("foo", "gcr.io/foo");
  let state = BuildStateSet::new()
    .with(image.id(), project.deployed_image("gcr.io/foo", &["main.go"], &["c-1"]))
    .with(k8s.id(), deployed());
  let specs = vec![TargetSpec::Image(image), TargetSpec::K8s(k8s)];

  harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &state)
    .await
    .unwrap();

  assert_eq!(harness.runtime.copy_count(), 0);
  assert_eq!(harness.runtime.build_count(), 1);
}

#[tokio::test]
async fn first_build_goes_straight_to_image_and_deploy() {
  let project = Project::new();
  let harness = Harness::new();
  let image = project.live_image("gcr.io/foo");
  let k8s = deployment("foo", "gcr.io/foo");
  let specs = vec![TargetSpec::Image(image.clone()), TargetSpec::K8s(k8s.clone())];

  let results = harness
    .chain(ClusterEnv::Gke)
    .build_and_deploy(&specs, &BuildStateSet::new())
    .await
    .unwrap();

  assert_eq!(harness.runtime.push_count(), 1);
  assert_eq!(
    harness.cluster.last_upserted()[0].images(),
    vec![format!("gcr.io/foo:{EXAMPLE_TAG}")]
  );
  assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn ineligibility_is_reported_when_nothing_else_applies() {
  let project = Project::new();
  let harness = Harness::new();
  let image = project.live_image("gcr.io/foo");
  let mut image_state = project.deployed_image("gcr.io/foo", &[], &["c-1"]);
  image_state.add_files_changed([project.src.parent().unwrap().join("Makefile")]);
  let state = BuildStateSet::new().with(image.id(), image_state);

  let failure = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&[TargetSpec::Image(image)], &state)
    .await
    .unwrap_err();

  assert!(matches!(
    failure.error,
    BuildError::Ineligible(Ineligible::UnsyncedFiles { .. })
  ));
  assert!(failure.partial.is_empty());
  assert_eq!(harness.runtime.build_count(), 0);
}
