use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An image reference could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid image reference: {0:?}")]
pub struct InvalidRef(pub String);

/// A tagged image reference, `name:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
  pub name: String,
  pub tag: String,
}

impl ImageRef {
  pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      tag: tag.into(),
    }
  }

  /// Parse `name[:tag][@digest]`. A missing tag means `latest`.
  pub fn parse(s: &str) -> Result<Self, InvalidRef> {
    let without_digest = s.split('@').next().unwrap_or_default();
    let slash = without_digest.rfind('/');
    let (name, tag) = match without_digest.rfind(':') {
      Some(colon) if slash.is_none_or(|slash| colon > slash) => {
        (&without_digest[..colon], &without_digest[colon + 1..])
      }
      _ => (without_digest, "latest"),
    };
    if name.is_empty() || tag.is_empty() || name.chars().any(char::is_whitespace) {
      return Err(InvalidRef(s.to_string()));
    }
    Ok(Self::new(name, tag))
  }
}

impl fmt::Display for ImageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.name, self.tag)
  }
}

impl TryFrom<String> for ImageRef {
  type Error = InvalidRef;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    Self::parse(&s)
  }
}

impl From<ImageRef> for String {
  fn from(r: ImageRef) -> Self {
    r.to_string()
  }
}

/// Runtime identifier of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ContainerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ContainerId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// Cluster identifier of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodId(pub String);

impl fmt::Display for PodId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for PodId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}
