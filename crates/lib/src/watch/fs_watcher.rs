//! [`FileWatcher`] backed by the `notify` crate.
//!
//! notify delivers events on its own thread through a callback; the callback
//! filters them and forwards the survivors onto Tokio channels.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{FileEvent, FileWatcher, WatchError, WatcherMaker};
use crate::model::PathMatcher;

/// Watches paths recursively with the platform's native backend.
///
/// Paths that do not exist yet are covered by watching their nearest existing
/// ancestor and filtering events back down to the requested paths.
pub struct NotifyWatcher {
  paths: Vec<PathBuf>,
  ignore: Arc<dyn PathMatcher>,
  watcher: Option<RecommendedWatcher>,
  events_tx: mpsc::UnboundedSender<FileEvent>,
  events_rx: Option<mpsc::UnboundedReceiver<FileEvent>>,
  errors_tx: mpsc::UnboundedSender<WatchError>,
  errors_rx: Option<mpsc::UnboundedReceiver<WatchError>>,
}

impl NotifyWatcher {
  pub fn new(paths: &[PathBuf], ignore: Arc<dyn PathMatcher>) -> Self {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    Self {
      paths: paths.iter().map(|p| canonical(p)).collect(),
      ignore,
      watcher: None,
      events_tx,
      events_rx: Some(events_rx),
      errors_tx,
      errors_rx: Some(errors_rx),
    }
  }
}

impl FileWatcher for NotifyWatcher {
  fn start(&mut self) -> Result<(), WatchError> {
    if self.watcher.is_some() {
      return Err(WatchError::AlreadyStarted);
    }

    let paths = self.paths.clone();
    let ignore = self.ignore.clone();
    let events_tx = self.events_tx.clone();
    let errors_tx = self.errors_tx.clone();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
      Ok(event) => forward_event(&event, &paths, ignore.as_ref(), &events_tx, &errors_tx),
      Err(e) => {
        let _ = errors_tx.send(from_notify(e, Path::new("")));
      }
    })
    .map_err(|e| from_notify(e, Path::new("")))?;

    for root in watch_roots(&self.paths) {
      debug!(root = %root.display(), "watching");
      watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| from_notify(e, &root))?;
    }

    self.watcher = Some(watcher);
    Ok(())
  }

  fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<FileEvent>> {
    self.events_rx.take()
  }

  fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<WatchError>> {
    self.errors_rx.take()
  }

  fn close(&mut self) -> Result<(), WatchError> {
    // Dropping the watcher unregisters every watch.
    self.watcher = None;
    Ok(())
  }
}

/// Makes [`NotifyWatcher`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatcherMaker;

impl WatcherMaker for NotifyWatcherMaker {
  fn make(&self, paths: &[PathBuf], ignore: Arc<dyn PathMatcher>) -> Result<Box<dyn FileWatcher>, WatchError> {
    Ok(Box::new(NotifyWatcher::new(paths, ignore)))
  }
}

fn forward_event(
  event: &notify::Event,
  paths: &[PathBuf],
  ignore: &dyn PathMatcher,
  events_tx: &mpsc::UnboundedSender<FileEvent>,
  errors_tx: &mpsc::UnboundedSender<WatchError>,
) {
  if event.need_rescan() {
    let _ = errors_tx.send(WatchError::Overflow);
    return;
  }
  if matches!(event.kind, EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_))) {
    return;
  }
  for path in &event.paths {
    if !paths.iter().any(|p| path.starts_with(p)) || ignore.matches(path) {
      trace!(path = %path.display(), "dropping file event");
      continue;
    }
    let _ = events_tx.send(FileEvent::new(path.clone()));
  }
}

fn from_notify(e: notify::Error, fallback: &Path) -> WatchError {
  let path = e.paths.first().cloned().unwrap_or_else(|| fallback.to_path_buf());
  match e.kind {
    notify::ErrorKind::MaxFilesWatch => WatchError::Limit(e.to_string()),
    _ => WatchError::Watch {
      path,
      message: e.to_string(),
    },
  }
}

/// Canonical form of `path`, or `path` itself if it does not exist.
fn canonical(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The existing directories to register so every path is covered, without
/// registering a directory already covered by another root.
fn watch_roots(paths: &[PathBuf]) -> Vec<PathBuf> {
  let mut roots: Vec<PathBuf> = paths
    .iter()
    .filter_map(|p| p.ancestors().find(|a| a.exists()).map(Path::to_path_buf))
    .collect();
  roots.sort();
  roots.dedup();
  let all = roots.clone();
  roots.retain(|r| !all.iter().any(|other| other != r && r.starts_with(other)));
  roots
}
