use std::sync::Arc;
use std::time::Duration;

use devloop_lib::engine::{BuildController, EngineAction, forward_pod_events};
use devloop_lib::fake::FakeWatcherMaker;
use devloop_lib::model::{ContainerId, ImageRef, PodId, TargetId, TargetSpec};
use devloop_lib::runtime::{ClusterEnv, PodContainer, PodEvent};
use devloop_lib::state::BuildStateSet;
use devloop_lib::watch::{CoalesceConfig, GlobalIgnore, WatchInputs, WatchManager, watchable_targets};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::common::{EXAMPLE_TAG, Harness, Project, deployment};

async fn eventually(mut check: impl FnMut() -> bool) {
  tokio::time::timeout(Duration::from_secs(5), async {
    while !check() {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("condition was not reached in time");
}

fn spawn_controller(
  mut controller: BuildController,
  specs: Vec<TargetSpec>,
  mut actions: mpsc::Receiver<EngineAction>,
  cancel: CancellationToken,
) -> tokio::task::JoinHandle<BuildStateSet> {
  tokio::spawn(async move {
    controller.run(&specs, &mut actions, &cancel).await;
    controller.into_state()
  })
}

fn running_pod(image: &str) -> PodEvent {
  PodEvent {
    pod_id: PodId::from("foo-7d9f"),
    namespace: "default".to_string(),
    containers: vec![PodContainer {
      name: "app".to_string(),
      container_id: ContainerId::from("c-1"),
      image: ImageRef::parse(image).unwrap(),
      ready: true,
    }],
    deleted: false,
  }
}

#[tokio::test]
async fn edits_flow_from_watch_to_live_update() {
  let project = Project::new();
  let harness = Harness::new();
  let image = project.live_image("gcr.io/foo");
  let image_id = image.id();
  let specs = vec![TargetSpec::Image(image), TargetSpec::K8s(deployment("foo", "gcr.io/foo"))];

  let (tx, rx) = mpsc::channel::<EngineAction>(64);
  let cancel = CancellationToken::new();
  let maker = Arc::new(FakeWatcherMaker::new());
  let watches = WatchManager::new(
    maker.clone(),
    CoalesceConfig {
      min_rest: Duration::from_millis(10),
      max_duration: Duration::from_millis(100),
    },
  );
  let inputs = WatchInputs {
    targets: watchable_targets(&specs, &[]),
    global_ignore: GlobalIgnore::default(),
  };
  watches.on_change(&inputs, &tx).unwrap();

  let pods = {
    let cluster = harness.cluster.clone();
    let specs = specs.clone();
    let tx = tx.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { forward_pod_events(cluster, &specs, tx, None, cancel).await })
  };
  let controller = BuildController::new(harness.chain(ClusterEnv::DockerDesktop));
  let engine = spawn_controller(controller, specs, rx, cancel.clone());

  // The first cycle has nothing to patch, so it builds and deploys.
  eventually(|| harness.cluster.upsert_count() == 1).await;
  eventually(|| !harness.cluster.watch_selectors().is_empty()).await;
  harness
    .cluster
    .emit_pod(running_pod(&format!("gcr.io/foo:{EXAMPLE_TAG}")))
    .await;
  tokio::time::sleep(Duration::from_millis(50)).await;

  let watch = maker.handle_for(&project.path("a.txt")).unwrap();
  watch.send(project.path("a.txt"));
  eventually(|| harness.runtime.copy_count() == 1).await;

  cancel.cancel();
  let state = engine.await.unwrap();
  pods.await.unwrap().unwrap();
  watches.close_all();

  let image_state = state.get(&image_id).unwrap();
  assert!(!image_state.has_changed_files());
  assert_eq!(
    image_state.last_result.live_updated_container_ids,
    vec![ContainerId::from("c-1")]
  );
  assert_eq!(harness.runtime.build_count(), 1);
  assert_eq!(harness.runtime.execs()[0].1.to_string(), "echo a");
  assert_eq!(state.get(&TargetId::k8s("foo")).unwrap().last_result.deployed_uids, vec!["uid-1"]);
}

#[tokio::test]
async fn failed_cycle_keeps_the_edit_pending() {
  let project = Project::new();
  let harness = Harness::new();
  harness.runtime.fail_builds("daemon unavailable");
  let image = project.live_image("gcr.io/foo");
  let image_id = image.id();
  let specs = vec![TargetSpec::Image(image), TargetSpec::K8s(deployment("foo", "gcr.io/foo"))];
  let (tx, rx) = mpsc::channel::<EngineAction>(8);
  let cancel = CancellationToken::new();

  let controller = BuildController::new(harness.chain(ClusterEnv::DockerDesktop));
  let engine = spawn_controller(controller, specs, rx, cancel.clone());

  tx.send(EngineAction::ContainersObserved {
    target: image_id.clone(),
    containers: Vec::new(),
  })
  .await
  .unwrap();
  tx.send(EngineAction::FilesChanged {
    target: image_id.clone(),
    files: vec![project.path("a.txt")],
  })
  .await
  .unwrap();
  drop(tx);

  let state = engine.await.unwrap();
  assert_eq!(harness.cluster.upsert_count(), 0);
  assert!(state.get(&image_id).unwrap().has_changed_files());
}
