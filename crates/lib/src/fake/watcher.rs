use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::lock;
use crate::model::PathMatcher;
use crate::watch::{FileEvent, FileWatcher, WatchError, WatcherMaker};

/// Test-side handle to a [`FakeWatcher`]: push events and errors into it.
#[derive(Clone)]
pub struct FakeWatcherHandle {
  pub paths: Vec<PathBuf>,
  ignore: Arc<dyn PathMatcher>,
  events: mpsc::UnboundedSender<FileEvent>,
  errors: mpsc::UnboundedSender<WatchError>,
  closed: Arc<AtomicBool>,
}

impl FakeWatcherHandle {
  /// Report a change, unless the watcher's ignore rules drop it.
  pub fn send(&self, path: impl AsRef<Path>) {
    let path = path.as_ref();
    if self.closed.load(Ordering::SeqCst) || self.ignore.matches(path) {
      return;
    }
    let _ = self.events.send(FileEvent::new(path));
  }

  pub fn send_error(&self, error: WatchError) {
    let _ = self.errors.send(error);
  }

  pub fn ignores(&self, path: &Path) -> bool {
    self.ignore.matches(path)
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }
}

/// A watcher whose events come from its [`FakeWatcherHandle`].
pub struct FakeWatcher {
  events: Option<mpsc::UnboundedReceiver<FileEvent>>,
  errors: Option<mpsc::UnboundedReceiver<WatchError>>,
  closed: Arc<AtomicBool>,
  fail_start: bool,
}

impl FileWatcher for FakeWatcher {
  fn start(&mut self) -> Result<(), WatchError> {
    if self.fail_start {
      return Err(WatchError::Limit("fake watcher refused to start".to_string()));
    }
    Ok(())
  }

  fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<FileEvent>> {
    self.events.take()
  }

  fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<WatchError>> {
    self.errors.take()
  }

  fn close(&mut self) -> Result<(), WatchError> {
    self.closed.store(true, Ordering::SeqCst);
    Ok(())
  }
}

/// Makes [`FakeWatcher`]s and keeps a handle to each, in creation order.
#[derive(Default)]
pub struct FakeWatcherMaker {
  handles: Mutex<Vec<FakeWatcherHandle>>,
  fail_next_start: AtomicBool,
}

impl FakeWatcherMaker {
  pub fn new() -> Self {
    Self::default()
  }

  /// The next watcher made will fail to start.
  pub fn fail_next_start(&self) {
    self.fail_next_start.store(true, Ordering::SeqCst);
  }

  pub fn handles(&self) -> Vec<FakeWatcherHandle> {
    lock(&self.handles).clone()
  }

  /// The newest open watcher covering `path`.
  pub fn handle_for(&self, path: &Path) -> Option<FakeWatcherHandle> {
    lock(&self.handles)
      .iter()
      .rev()
      .find(|h| !h.is_closed() && h.paths.iter().any(|p| path.starts_with(p)))
      .cloned()
  }
}

impl WatcherMaker for FakeWatcherMaker {
  fn make(&self, paths: &[PathBuf], ignore: Arc<dyn PathMatcher>) -> Result<Box<dyn FileWatcher>, WatchError> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    lock(&self.handles).push(FakeWatcherHandle {
      paths: paths.to_vec(),
      ignore,
      events: events_tx,
      errors: errors_tx,
      closed: closed.clone(),
    });
    Ok(Box::new(FakeWatcher {
      events: Some(events_rx),
      errors: Some(errors_rx),
      closed,
      fail_start: self.fail_next_start.swap(false, Ordering::SeqCst),
    }))
  }
}
