//! Filesystem watching.
//!
//! Raw watcher events are coalesced into change-sets ([`coalesce_events`]) and
//! attributed to targets by the [`WatchManager`], which keeps one low-level
//! watcher per watchable target and restarts it whenever the target's watch
//! rules change.

mod coalesce;
mod fs_watcher;
mod manager;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::PathMatcher;

pub use coalesce::{CoalesceConfig, coalesce_events};
pub use fs_watcher::{NotifyWatcher, NotifyWatcherMaker};
pub use manager::{GlobalIgnore, WatchDiff, WatchEvent, WatchInputs, WatchManager, WatchableTarget, watchable_targets};

/// Shown when the OS event queue overflowed and changes may have been lost.
pub const OVERFLOW_MESSAGE: &str = "the file watch event queue overflowed, so some file changes may have been missed. \
   Raise the OS limit (on Linux: sysctl fs.inotify.max_queued_events) and restart.";

/// A change to one path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEvent {
  pub path: PathBuf,
}

impl FileEvent {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

/// Errors from a low-level watcher.
#[derive(Debug, Error)]
pub enum WatchError {
  /// The OS dropped events.
  #[error("{}", OVERFLOW_MESSAGE)]
  Overflow,

  /// The OS limit on watched files was reached.
  #[error("too many watched files: {0}")]
  Limit(String),

  /// Watching a path failed.
  #[error("watching {}: {message}", path.display())]
  Watch { path: PathBuf, message: String },

  /// Ignore rules could not be compiled.
  #[error("invalid ignore rules: {0}")]
  Ignore(#[from] ignore::Error),

  /// The watcher's streams were already taken or it was started twice.
  #[error("watcher already started")]
  AlreadyStarted,
}

/// A low-level watcher over a set of paths.
///
/// Events and errors are delivered on channels the caller takes once.
pub trait FileWatcher: Send {
  fn start(&mut self) -> Result<(), WatchError>;

  fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<FileEvent>>;

  fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<WatchError>>;

  fn close(&mut self) -> Result<(), WatchError>;
}

/// Creates watchers. Paths matched by `ignore` are never reported.
pub trait WatcherMaker: Send + Sync {
  fn make(&self, paths: &[PathBuf], ignore: Arc<dyn PathMatcher>) -> Result<Box<dyn FileWatcher>, WatchError>;
}
