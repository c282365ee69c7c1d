//! Parsing streamed build-backend output.
//!
//! The backend emits one JSON message per line. Modern backends report the
//! built image's digest in an `aux` message; older ones only print
//! `Successfully built <short id>` and the digest has to be looked up.

use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info};

use super::BuildError;
use crate::consts::BUILD_LOG_TARGET;
use crate::digest::Digest;
use crate::runtime::{BuildOutput, RuntimeError};

const LEGACY_SUCCESS_PREFIX: &str = "Successfully built ";

#[derive(Debug, Default, Deserialize)]
struct BuildMessage {
  #[serde(default)]
  stream: Option<String>,
  #[serde(default)]
  aux: Option<AuxMessage>,
  #[serde(default)]
  error: Option<String>,
  #[serde(default, rename = "errorDetail")]
  error_detail: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct AuxMessage {
  #[serde(default, rename = "ID")]
  id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
  #[serde(default)]
  message: Option<String>,
}

/// What the build output says about the image it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltImage {
  /// Full content digest.
  Digest(Digest),
  /// Short image id from legacy output; needs an inspect to resolve.
  ShortId(String),
}

/// Consume build output, logging it and recovering the built image.
///
/// # Errors
///
/// Returns [`BuildError::ImageBuild`] when the backend reports an error or
/// finishes without naming an image.
pub async fn read_build_output(image: &str, output: BuildOutput) -> Result<BuiltImage, BuildError> {
  let mut lines = output.lines();
  let mut digest = None;
  let mut short_id = None;

  while let Some(line) = lines
    .next_line()
    .await
    .map_err(|e| BuildError::backend("reading build output", RuntimeError::Io(e)))?
  {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let message: BuildMessage = match serde_json::from_str(line) {
      Ok(message) => message,
      Err(e) => {
        debug!(image, error = %e, "skipping unparseable build output line");
        continue;
      }
    };

    if let Some(error) = message.error_detail.and_then(|d| d.message).or(message.error) {
      return Err(BuildError::ImageBuild {
        image: image.to_string(),
        message: error,
      });
    }

    if let Some(id) = message.aux.and_then(|a| a.id) {
      digest = Some(Digest::new(id));
    }

    if let Some(stream) = message.stream {
      for text in stream.lines().map(str::trim_end).filter(|t| !t.is_empty()) {
        info!(target: BUILD_LOG_TARGET, image, "{text}");
        if let Some(id) = text.trim().strip_prefix(LEGACY_SUCCESS_PREFIX) {
          short_id = Some(id.trim().to_string());
        }
      }
    }
  }

  match (digest, short_id) {
    (Some(digest), _) => Ok(BuiltImage::Digest(digest)),
    (None, Some(id)) => Ok(BuiltImage::ShortId(id)),
    (None, None) => Err(BuildError::ImageBuild {
      image: image.to_string(),
      message: "build output did not include an image id".to_string(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fake::{EXAMPLE_BUILD_OUTPUT, EXAMPLE_BUILD_OUTPUT_LEGACY, EXAMPLE_DIGEST, EXAMPLE_SHORT_ID};
  use std::io::Cursor;
  use tracing_test::traced_test;

  fn output(text: &str) -> BuildOutput {
    Box::new(Cursor::new(text.as_bytes().to_vec()))
  }

  #[tokio::test]
  async fn modern_output_carries_digest() {
    let built = read_build_output("gcr.io/foo", output(EXAMPLE_BUILD_OUTPUT)).await.unwrap();
    assert_eq!(built, BuiltImage::Digest(Digest::new(EXAMPLE_DIGEST)));
  }

  #[tokio::test]
  async fn legacy_output_carries_short_id() {
    let built = read_build_output("gcr.io/foo", output(EXAMPLE_BUILD_OUTPUT_LEGACY)).await.unwrap();
    assert_eq!(built, BuiltImage::ShortId(EXAMPLE_SHORT_ID.to_string()));
  }

  #[tokio::test]
  async fn error_message_fails_the_build() {
    let text = r#"{"stream":"Step 1/2 : RUN false"}
{"errorDetail":{"code":1,"message":"The command '/bin/sh -c false' returned a non-zero code: 1"},"error":"The command '/bin/sh -c false' returned a non-zero code: 1"}
"#;
    let err = read_build_output("gcr.io/foo", output(text)).await.unwrap_err();
    assert!(matches!(err, BuildError::ImageBuild { .. }));
    assert!(err.to_string().contains("returned a non-zero code: 1"));
  }

  #[tokio::test]
  async fn output_without_id_fails() {
    let err = read_build_output("gcr.io/foo", output("{\"stream\":\"hi\"}\n")).await.unwrap_err();
    assert!(err.to_string().contains("did not include an image id"));
  }

  #[traced_test]
  #[tokio::test]
  async fn stream_text_goes_to_build_log() {
    read_build_output("gcr.io/foo", output(EXAMPLE_BUILD_OUTPUT)).await.unwrap();
    assert!(logs_contain("Step 1/1 : FROM alpine"));
  }
}
