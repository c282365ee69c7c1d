use std::path::PathBuf;

use devloop_lib::build::BuildError;
use devloop_lib::fake::EXAMPLE_BUILD_OUTPUT_LEGACY;
use devloop_lib::model::{ComposeTarget, TargetId, TargetSpec};
use devloop_lib::runtime::ClusterEnv;
use devloop_lib::state::BuildStateSet;

use super::common::{EXAMPLE_TAG, Harness, Project, context_dockerfile, deployment};

#[tokio::test]
async fn dependency_images_are_built_first_and_injected() {
  let project = Project::new();
  let harness = Harness::new();
  let base = project.image("gcr.io/base", "FROM alpine");
  let app = project
    .image(
      "gcr.io/app",
      "FROM --platform=linux/amd64 gcr.io/base AS builder\nRUN make\n\nfrom alpine\nCOPY --from=builder /out /out",
    )
    .with_dependencies([base.id()]);
  let specs = vec![
    TargetSpec::K8s(deployment("app", "gcr.io/app")),
    TargetSpec::Image(app),
    TargetSpec::Image(base),
  ];

  harness
    .chain(ClusterEnv::Kind)
    .build_and_deploy(&specs, &BuildStateSet::new())
    .await
    .unwrap();

  let builds = harness.runtime.builds();
  assert_eq!(builds.len(), 2);
  assert_eq!(context_dockerfile(&builds[0].0), "FROM alpine");
  assert_eq!(
    context_dockerfile(&builds[1].0),
    format!(
      "FROM --platform=linux/amd64 gcr.io/base:{EXAMPLE_TAG} AS builder\nRUN make\n\nfrom alpine\nCOPY --from=builder /out /out"
    )
  );
  assert_eq!(harness.runtime.push_count(), 2);
}

#[tokio::test]
async fn legacy_build_output_is_resolved_through_inspect() {
  let project = Project::new();
  let harness = Harness::new();
  harness.runtime.set_build_output(EXAMPLE_BUILD_OUTPUT_LEGACY);
  let specs = vec![
    TargetSpec::Image(project.image("gcr.io/foo", "FROM alpine")),
    TargetSpec::K8s(deployment("foo", "gcr.io/foo")),
  ];

  let results = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &BuildStateSet::new())
    .await
    .unwrap();

  assert_eq!(
    results.image(&TargetId::image("gcr.io/foo")).unwrap().to_string(),
    format!("gcr.io/foo:{EXAMPLE_TAG}")
  );
  assert_eq!(harness.runtime.push_count(), 0);
}

#[tokio::test]
async fn dependency_cycle_stops_the_chain() {
  let project = Project::new();
  let harness = Harness::new();
  let a = project
    .image("gcr.io/a", "FROM gcr.io/b")
    .with_dependencies([TargetId::image("gcr.io/b")]);
  let b = project
    .image("gcr.io/b", "FROM gcr.io/a")
    .with_dependencies([TargetId::image("gcr.io/a")]);
  let specs = vec![
    TargetSpec::Image(a),
    TargetSpec::Image(b),
    TargetSpec::K8s(deployment("a", "gcr.io/a")),
  ];

  let failure = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &BuildStateSet::new())
    .await
    .unwrap_err();

  assert!(matches!(failure.error, BuildError::Cycle(_)));
  assert!(!failure.error.should_fall_back());
  assert_eq!(harness.runtime.build_count(), 0);
  assert_eq!(harness.compose.up_calls().len(), 0);
}

#[tokio::test]
async fn image_build_failure_is_fatal() {
  let project = Project::new();
  let harness = Harness::new();
  harness
    .runtime
    .set_build_output(r#"{"errorDetail":{"message":"COPY failed: no such file"},"error":"COPY failed: no such file"}"#);
  let specs = vec![
    TargetSpec::Image(project.image("gcr.io/foo", "FROM alpine")),
    TargetSpec::K8s(deployment("foo", "gcr.io/foo")),
  ];

  let failure = harness
    .chain(ClusterEnv::DockerDesktop)
    .build_and_deploy(&specs, &BuildStateSet::new())
    .await
    .unwrap_err();

  assert_eq!(
    failure.error.to_string(),
    "building gcr.io/foo: COPY failed: no such file"
  );
  assert_eq!(harness.cluster.upsert_count(), 0);
}

#[tokio::test]
async fn compose_targets_are_built_locally_and_brought_up() {
  let project = Project::new();
  let harness = Harness::new();
  let image = project.live_image("web");
  let compose = ComposeTarget {
    name: "web".to_string(),
    config_paths: vec![PathBuf::from("docker-compose.yml")],
    service: "web".to_string(),
    dependency_ids: vec![image.id()],
  };
  let specs = vec![TargetSpec::Image(image), TargetSpec::Compose(compose)];

  let results = harness
    .chain(ClusterEnv::Gke)
    .build_and_deploy(&specs, &BuildStateSet::new())
    .await
    .unwrap();

  assert_eq!(harness.runtime.push_count(), 0);
  assert_eq!(harness.cluster.upsert_count(), 0);
  assert_eq!(
    harness.compose.up_calls(),
    vec![(vec![PathBuf::from("docker-compose.yml")], "web".to_string())]
  );
  assert_eq!(
    results.get(&TargetId::compose("web")).unwrap().deployed_uids,
    vec!["web"]
  );
}
