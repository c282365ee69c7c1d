//! Full image builds.
//!
//! An image build streams the build context to the backend, recovers the
//! content digest from the output, tags the image with the tag derived from
//! that digest, checks the tag resolves back to the same digest, and pushes
//! when the cluster cannot see the local image store.

use std::sync::Arc;

use tracing::{debug, info};

use super::context::build_context;
use super::output::{BuiltImage, read_build_output};
use super::{BuildError, BuildFailure, TargetQueue};
use crate::config::EngineConfig;
use crate::consts::DOCKERFILE_NAME;
use crate::digest::{Digest, digest_as_tag, digest_matches_ref};
use crate::model::{ImageRef, ImageTarget, TargetSpec};
use crate::runtime::{BuildOptions, ContainerRuntime};
use crate::state::{BuildResult, BuildResultSet, BuildStateSet};

/// Builds, tags, verifies and optionally pushes images.
pub struct ImageBuilder {
  runtime: Arc<dyn ContainerRuntime>,
  remove_intermediate: bool,
}

impl ImageBuilder {
  pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &EngineConfig) -> Self {
    Self {
      runtime,
      remove_intermediate: config.remove_intermediate_containers,
    }
  }

  /// Build one image on top of freshly built `bases`.
  ///
  /// # Arguments
  ///
  /// * `target` - The image to build
  /// * `bases` - References of the images `target` depends on
  /// * `push` - Push the tagged image to its registry
  pub async fn build_image(&self, target: &ImageTarget, bases: &[ImageRef], push: bool) -> Result<ImageRef, BuildError> {
    let dockerfile = inject_base_images(&target.build.dockerfile, bases);

    let context_target = target.clone();
    let context = tokio::task::spawn_blocking(move || build_context(&context_target, &dockerfile))
      .await
      .map_err(std::io::Error::other)
      .and_then(|r| r)
      .map_err(|source| BuildError::Context {
        target: target.id(),
        source,
      })?;

    let options = BuildOptions {
      dockerfile: DOCKERFILE_NAME.to_string(),
      build_args: target.build.build_args.clone(),
      remove_intermediate: self.remove_intermediate,
    };
    info!(image = %target.name, bytes = context.len(), "building image");
    let output = self
      .runtime
      .image_build(context, &options)
      .await
      .map_err(|e| BuildError::backend("image build", e))?;

    let digest = match read_build_output(&target.name, output).await? {
      BuiltImage::Digest(digest) => digest,
      BuiltImage::ShortId(id) => {
        debug!(image = %target.name, id = %id, "resolving short image id");
        let inspect = self
          .runtime
          .image_inspect(&id)
          .await
          .map_err(|e| BuildError::backend("image inspect", e))?;
        Digest::new(inspect.id)
      }
    };

    let reference = ImageRef::new(&target.name, digest_as_tag(&digest)?);
    self
      .runtime
      .image_tag(digest.as_str(), &reference)
      .await
      .map_err(|e| BuildError::backend("image tag", e))?;

    let resolved = self
      .runtime
      .image_inspect(&reference.to_string())
      .await
      .map_err(|e| BuildError::backend("image inspect", e))?;
    let actual = Digest::new(resolved.id);
    if !digest_matches_ref(&reference, &actual) {
      return Err(BuildError::DigestMismatch {
        reference,
        expected: digest,
        actual,
      });
    }

    if push {
      info!(image = %reference, "pushing image");
      self
        .runtime
        .image_push(&reference)
        .await
        .map_err(|e| BuildError::backend("image push", e))?;
    }

    info!(image = %reference, "built image");
    Ok(reference)
  }

  /// Build every image target the queue marks, reusing the rest.
  ///
  /// The returned set has an image result for every image target in
  /// `specs`, built or reused. On failure, images finished so far are kept
  /// in the partial results.
  pub async fn build_images(
    &self,
    specs: &[TargetSpec],
    state: &BuildStateSet,
    queue: &TargetQueue,
    push: bool,
  ) -> Result<BuildResultSet, BuildFailure> {
    let mut results = BuildResultSet::new();

    for id in queue.order() {
      let Some(target) = specs.iter().filter_map(TargetSpec::as_image).find(|t| &t.id() == id) else {
        continue;
      };

      if !queue.needs_build(id)
        && let Some(image) = state.get(id).and_then(|s| s.last_image())
      {
        debug!(image = %image, "image is up to date");
        results.insert(id.clone(), BuildResult::image(image.clone()));
        continue;
      }

      let bases: Vec<ImageRef> = target
        .dependency_ids
        .iter()
        .filter_map(|dep| results.image(dep).cloned())
        .collect();
      match self.build_image(target, &bases, push).await {
        Ok(image) => results.insert(id.clone(), BuildResult::image(image)),
        Err(error) => return Err(BuildFailure::with_partial(error, results)),
      }
    }

    Ok(results)
  }
}

/// Point `FROM` lines naming a base image at its freshly built reference.
///
/// Stage names (`AS builder`) and `--platform` flags are kept.
pub fn inject_base_images(dockerfile: &str, bases: &[ImageRef]) -> String {
  if bases.is_empty() {
    return dockerfile.to_string();
  }

  let mut out = String::with_capacity(dockerfile.len());
  for line in dockerfile.split_inclusive('\n') {
    out.push_str(&inject_line(line, bases).unwrap_or_else(|| line.to_string()));
  }
  out
}

fn inject_line(line: &str, bases: &[ImageRef]) -> Option<String> {
  let trimmed = line.trim_start();
  let indent = &line[..line.len() - trimmed.len()];
  let (keyword, rest) = trimmed.split_once(char::is_whitespace)?;
  if !keyword.eq_ignore_ascii_case("from") {
    return None;
  }

  let mut words: Vec<&str> = rest.split_whitespace().collect();
  let pos = words.iter().position(|w| !w.starts_with("--"))?;
  let current = ImageRef::parse(words[pos]).ok()?;
  let base = bases.iter().find(|b| b.name == current.name)?;
  let replacement = base.to_string();
  words[pos] = &replacement;

  let newline = if line.ends_with('\n') { "\n" } else { "" };
  Some(format!("{indent}{keyword} {}{newline}", words.join(" ")))
}
