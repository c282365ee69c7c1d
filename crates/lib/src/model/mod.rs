//! The declarative model: targets, their specifications, and the small
//! value types (image refs, container ids, commands, path matchers) the
//! rest of the engine passes around.

mod cmd;
mod matcher;
mod refs;
mod target;

pub use cmd::Cmd;
pub use matcher::{CompositeMatcher, DirectoryMatcher, EmptyMatcher, IgnoreMatcher, PathMatcher, PathSet, RepoMatcher};
pub use refs::{ContainerId, ImageRef, InvalidRef, PodId};
pub use target::{
  ComposeTarget, DockerBuild, IgnoreSpec, ImageTarget, K8sTarget, LiveUpdate, RunStep, SyncRule, TargetId, TargetKind,
  TargetSpec, compose_targets, image_targets, k8s_targets, rebase,
};
