//! Errors from build strategies, and how the chain treats them.

use thiserror::Error;

use crate::digest::{Digest, DigestError};
use crate::liveupdate::{Ineligible, RunStepFailure};
use crate::model::{ContainerId, ImageRef, TargetId};
use crate::runtime::RuntimeError;
use crate::state::BuildResultSet;

/// Why a build strategy did not complete.
///
/// [`BuildError::should_fall_back`] splits these into errors that let the
/// chain try its next strategy and errors that stop the chain.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The strategy does not handle these targets.
  #[error("{0}")]
  Redirect(String),

  /// The change-set cannot be applied in place.
  #[error("live update not possible: {0}")]
  Ineligible(#[from] Ineligible),

  /// A live-update run step exited non-zero.
  #[error(transparent)]
  RunStep(#[from] RunStepFailure),

  /// Copy, exec or restart failed at the transport level.
  #[error("updating container {container}: {source}")]
  ContainerUpdate {
    container: ContainerId,
    #[source]
    source: RuntimeError,
  },

  /// A failure the chain must not paper over with another strategy.
  #[error("{0}")]
  DontFallBack(String),

  /// Image dependencies form a cycle.
  #[error("dependency cycle detected involving {0}")]
  Cycle(TargetId),

  /// A target depends on a target that is not part of this build.
  #[error("{target} depends on {dependency}, which is not part of this build")]
  MissingDependency { target: TargetId, dependency: TargetId },

  /// The backend produced a digest no tag can be derived from.
  #[error(transparent)]
  Digest(#[from] DigestError),

  /// A freshly tagged image resolved to a different digest.
  #[error("image {reference} resolved to {actual}, expected {expected}")]
  DigestMismatch {
    reference: ImageRef,
    expected: Digest,
    actual: Digest,
  },

  /// The build backend reported a failed build.
  #[error("building {image}: {message}")]
  ImageBuild { image: String, message: String },

  /// A backend, cluster or compose call failed outside live update.
  #[error("{operation}: {source}")]
  Backend {
    operation: &'static str,
    #[source]
    source: RuntimeError,
  },

  /// Reading local files for a build context or sync archive failed.
  #[error("reading files for {target}: {source}")]
  Context {
    target: TargetId,
    #[source]
    source: std::io::Error,
  },
}

impl BuildError {
  pub fn redirect(reason: impl Into<String>) -> Self {
    BuildError::Redirect(reason.into())
  }

  pub fn backend(operation: &'static str, source: RuntimeError) -> Self {
    BuildError::Backend { operation, source }
  }

  /// Whether the chain may try its next strategy after this error.
  pub fn should_fall_back(&self) -> bool {
    matches!(
      self,
      BuildError::Redirect(_)
        | BuildError::Ineligible(_)
        | BuildError::RunStep(_)
        | BuildError::ContainerUpdate { .. }
    )
  }

  /// Whether the strategy simply declined the targets.
  pub fn is_redirect(&self) -> bool {
    matches!(self, BuildError::Redirect(_))
  }
}

/// A failed strategy run, with whatever it completed before failing.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BuildFailure {
  pub error: BuildError,
  /// Results for side effects that did happen, e.g. containers already patched.
  pub partial: BuildResultSet,
}

impl BuildFailure {
  pub fn with_partial(error: BuildError, partial: BuildResultSet) -> Self {
    Self { error, partial }
  }
}

impl From<BuildError> for BuildFailure {
  fn from(error: BuildError) -> Self {
    Self {
      error,
      partial: BuildResultSet::new(),
    }
  }
}
