//! Content digests and the tags derived from them.
//!
//! A built image is tagged `tilt-<first 16 hex chars of its digest>`, so the
//! same content always gets the same tag. Checking that a reference still
//! points at a digest is a string comparison of derived tags, not a hash of
//! the image content.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{TAG_HEX_LEN, TAG_PREFIX};
use crate::model::ImageRef;

/// Errors from parsing a digest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
  /// The digest is not of the form `<algorithm>:<hex>`.
  #[error("invalid digest {0:?}: expected <algorithm>:<hex>")]
  Malformed(String),

  /// Not enough hex characters to derive a tag.
  #[error("invalid digest {digest:?}: too short, need at least 16 hex characters")]
  TooShort { digest: String },
}

/// A backend-computed content digest, e.g. `sha256:11cd0b38bc3c...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(pub String);

impl Digest {
  pub fn new(s: impl Into<String>) -> Self {
    Self(s.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Split into algorithm and hex parts.
  pub fn parts(&self) -> Result<(&str, &str), DigestError> {
    match self.0.split_once(':') {
      Some((algo, hex)) if !algo.is_empty() => Ok((algo, hex)),
      _ => Err(DigestError::Malformed(self.0.clone())),
    }
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Derive the deterministic tag for a digest.
///
/// # Errors
///
/// Returns [`DigestError::Malformed`] without an algorithm prefix and
/// [`DigestError::TooShort`] when fewer than 16 hex characters follow it.
pub fn digest_as_tag(digest: &Digest) -> Result<String, DigestError> {
  let (_, hex) = digest.parts()?;
  let prefix: String = hex.chars().take_while(char::is_ascii_hexdigit).take(TAG_HEX_LEN).collect();
  if prefix.len() < TAG_HEX_LEN {
    return Err(DigestError::TooShort {
      digest: digest.0.clone(),
    });
  }
  Ok(format!("{TAG_PREFIX}{prefix}"))
}

/// Whether `image_ref` carries the tag derived from `digest`.
///
/// A digest that cannot produce a tag never matches.
pub fn digest_matches_ref(image_ref: &ImageRef, digest: &Digest) -> bool {
  digest_as_tag(digest).is_ok_and(|tag| tag == image_ref.tag)
}
