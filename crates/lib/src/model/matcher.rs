//! Path matchers.
//!
//! Matchers answer one question: does this absolute path belong to the set?
//! They are used for run-step triggers, fall-back-on lists, and the ignore
//! rules applied to watches and build contexts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};

use super::target::IgnoreSpec;

/// Something that can decide whether a path is part of a set.
pub trait PathMatcher: Send + Sync + fmt::Debug {
  fn matches(&self, path: &Path) -> bool;
}

/// A set of files and directories, relative to a base directory.
///
/// A path matches when it equals one of the entries or lies beneath one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathSet {
  #[serde(default)]
  pub base_dir: PathBuf,
  #[serde(default)]
  pub paths: Vec<PathBuf>,
}

impl PathSet {
  pub fn new(base_dir: impl Into<PathBuf>, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
    Self {
      base_dir: base_dir.into(),
      paths: paths.into_iter().map(Into::into).collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  /// Entries resolved against the base directory.
  pub fn absolute_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
    self.paths.iter().map(|p| {
      if p.is_absolute() {
        p.clone()
      } else {
        self.base_dir.join(p)
      }
    })
  }

  pub fn matches(&self, path: &Path) -> bool {
    self.absolute_paths().any(|p| path.starts_with(&p))
  }
}

impl PathMatcher for PathSet {
  fn matches(&self, path: &Path) -> bool {
    PathSet::matches(self, path)
  }
}

/// Matches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyMatcher;

impl PathMatcher for EmptyMatcher {
  fn matches(&self, _path: &Path) -> bool {
    false
  }
}

/// Gitignore-syntax rules compiled from one or more ignore files.
pub struct IgnoreMatcher {
  rules: Vec<Gitignore>,
}

impl IgnoreMatcher {
  /// Compile ignore specs. Each spec is anchored at its own base directory.
  pub fn new(specs: &[IgnoreSpec]) -> Result<Self, ignore::Error> {
    let mut rules = Vec::with_capacity(specs.len());
    for spec in specs.iter().filter(|s| !s.patterns.is_empty()) {
      let mut builder = GitignoreBuilder::new(&spec.base_dir);
      for pattern in &spec.patterns {
        builder.add_line(None, pattern)?;
      }
      rules.push(builder.build()?);
    }
    Ok(Self { rules })
  }
}

impl fmt::Debug for IgnoreMatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IgnoreMatcher")
      .field("roots", &self.rules.iter().map(|r| r.path()).collect::<Vec<_>>())
      .finish()
  }
}

impl PathMatcher for IgnoreMatcher {
  fn matches(&self, path: &Path) -> bool {
    self.rules.iter().any(|rule| {
      // Gitignore panics on paths outside its root.
      rule.path().is_absolute()
        && path.starts_with(rule.path())
        && rule.matched_path_or_any_parents(path, path.is_dir()).is_ignore()
    })
  }
}

/// Matches any path beneath one of the listed directories.
#[derive(Debug, Clone, Default)]
pub struct DirectoryMatcher {
  dirs: Vec<PathBuf>,
}

impl DirectoryMatcher {
  pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
    Self {
      dirs: dirs.into_iter().map(Into::into).collect(),
    }
  }
}

impl PathMatcher for DirectoryMatcher {
  fn matches(&self, path: &Path) -> bool {
    self.dirs.iter().any(|d| path.starts_with(d))
  }
}

/// Matches `.git` internals under version-control roots.
#[derive(Debug, Clone, Default)]
pub struct RepoMatcher {
  git_dirs: Vec<PathBuf>,
}

impl RepoMatcher {
  pub fn new(repos: &[PathBuf]) -> Self {
    Self {
      git_dirs: repos.iter().map(|r| r.join(".git")).collect(),
    }
  }
}

impl PathMatcher for RepoMatcher {
  fn matches(&self, path: &Path) -> bool {
    self.git_dirs.iter().any(|d| path.starts_with(d))
  }
}

/// Matches when any of its members match.
///
/// An ignore composite therefore keeps a path only when no member ignores it.
#[derive(Debug, Clone, Default)]
pub struct CompositeMatcher {
  members: Vec<Arc<dyn PathMatcher>>,
}

impl CompositeMatcher {
  pub fn new(members: Vec<Arc<dyn PathMatcher>>) -> Self {
    Self { members }
  }
}

impl PathMatcher for CompositeMatcher {
  fn matches(&self, path: &Path) -> bool {
    self.members.iter().any(|m| m.matches(path))
  }
}
