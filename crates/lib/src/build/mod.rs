//! Build Strategy Chain.
//!
//! A cycle hands the full target list and the prior state snapshot to an
//! ordered chain of strategies. The first strategy to succeed wins. A
//! fallback-eligible failure moves on to the next strategy with the same
//! snapshot; any other failure stops the chain.
//!
//! # Submodules
//!
//! - [`queue`] - Dependency ordering and cycle detection
//! - [`image`] - Full image builds (context, digest, tag, verify, push)
//! - [`deploy`] - Kubernetes and compose deploy strategies

mod context;
pub mod deploy;
mod error;
pub mod image;
mod output;
pub mod queue;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use context::build_context;
pub use deploy::{ComposeBuildAndDeployer, ImageBuildAndDeployer, inject_images};
pub use error::{BuildError, BuildFailure};
pub use image::{ImageBuilder, inject_base_images};
pub use output::{BuiltImage, read_build_output};
pub use queue::TargetQueue;

use crate::config::EngineConfig;
use crate::liveupdate::LiveUpdateBuildAndDeployer;
use crate::model::TargetSpec;
use crate::runtime::{AgentManager, ClusterClient, ComposeClient, ContainerRuntime};
use crate::state::{BuildResultSet, BuildStateSet};

/// The external systems a strategy chain drives.
#[derive(Clone)]
pub struct Backends {
  pub runtime: Arc<dyn ContainerRuntime>,
  pub cluster: Arc<dyn ClusterClient>,
  pub compose: Arc<dyn ComposeClient>,
  /// Agent connections for remote clusters, if available.
  pub agents: Option<Arc<AgentManager>>,
}

/// One build strategy.
pub enum BuildAndDeployer {
  LiveUpdate(LiveUpdateBuildAndDeployer),
  Image(ImageBuildAndDeployer),
  Compose(ComposeBuildAndDeployer),
}

impl BuildAndDeployer {
  pub fn name(&self) -> &'static str {
    match self {
      BuildAndDeployer::LiveUpdate(_) => "live-update",
      BuildAndDeployer::Image(_) => "image",
      BuildAndDeployer::Compose(_) => "compose",
    }
  }

  pub async fn build_and_deploy(
    &self,
    specs: &[TargetSpec],
    state: &BuildStateSet,
  ) -> Result<BuildResultSet, BuildFailure> {
    match self {
      BuildAndDeployer::LiveUpdate(b) => b.build_and_deploy(specs, state).await,
      BuildAndDeployer::Image(b) => b.build_and_deploy(specs, state).await,
      BuildAndDeployer::Compose(b) => b.build_and_deploy(specs, state).await,
    }
  }
}

/// Runs strategies in order with fallback.
pub struct CompositeBuildAndDeployer {
  builders: Vec<BuildAndDeployer>,
}

impl CompositeBuildAndDeployer {
  pub fn new(builders: Vec<BuildAndDeployer>) -> Self {
    Self { builders }
  }

  /// Live update, then image, then compose. Live update is left out when the
  /// config disables it.
  pub fn default_chain(backends: &Backends, config: &EngineConfig) -> Self {
    let mut builders = Vec::with_capacity(3);
    if config.live_update_enabled() {
      builders.push(BuildAndDeployer::LiveUpdate(LiveUpdateBuildAndDeployer::new(
        backends.runtime.clone(),
        backends.agents.clone(),
        config,
      )));
    }
    builders.push(BuildAndDeployer::Image(ImageBuildAndDeployer::new(
      ImageBuilder::new(backends.runtime.clone(), config),
      backends.cluster.clone(),
      config.cluster_env,
    )));
    builders.push(BuildAndDeployer::Compose(ComposeBuildAndDeployer::new(
      ImageBuilder::new(backends.runtime.clone(), config),
      backends.compose.clone(),
    )));
    Self::new(builders)
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.builders.iter().map(BuildAndDeployer::name).collect()
  }

  /// Run the chain against one snapshot.
  ///
  /// Every strategy sees the same `state`. Partial results from failed
  /// strategies are merged into whatever is returned, success or failure.
  ///
  /// # Errors
  ///
  /// The first error that does not allow fallback. If every strategy falls
  /// back, the last error that was not a redirect, or else the last redirect.
  pub async fn build_and_deploy(
    &self,
    specs: &[TargetSpec],
    state: &BuildStateSet,
  ) -> Result<BuildResultSet, BuildFailure> {
    let mut merged = BuildResultSet::new();
    let mut last_unexpected = None;
    let mut last_redirect = None;

    for builder in &self.builders {
      match builder.build_and_deploy(specs, state).await {
        Ok(results) => {
          info!(strategy = builder.name(), targets = results.len(), "build complete");
          merged.merge(results);
          return Ok(merged);
        }
        Err(BuildFailure { error, partial }) => {
          merged.merge(partial);
          if !error.should_fall_back() {
            return Err(BuildFailure::with_partial(error, merged));
          }
          if error.is_redirect() {
            debug!(strategy = builder.name(), reason = %error, "strategy declined targets");
            last_redirect = Some(error);
          } else {
            warn!(strategy = builder.name(), error = %error, "falling back to next strategy");
            last_unexpected = Some(error);
          }
        }
      }
    }

    let error = last_unexpected
      .or(last_redirect)
      .unwrap_or_else(|| BuildError::redirect("no build strategy configured"));
    Err(BuildFailure::with_partial(error, merged))
  }
}
