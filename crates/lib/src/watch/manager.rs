//! Keeping one watch per target in step with the desired target set.
//!
//! Every reconciliation diffs the desired [`WatchableTarget`]s against the
//! registered ones. Targets that are new, or whose watch rules changed, get a
//! fresh watcher; targets that disappeared, or whose rules changed, lose the
//! old one. New watchers are always started before old ones are torn down so
//! no change slips through the gap. The resulting duplicate events are
//! harmless because changed-file accumulation is idempotent.
//!
//! Each registration runs its own delivery task: it coalesces raw events and
//! dispatches one [`WatchEvent::FilesChanged`] per batch. Delivery tasks only
//! hold a copy of their target id; they never touch the registry.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CoalesceConfig, FileEvent, FileWatcher, WatchError, WatcherMaker, coalesce_events};
use crate::model::{
  CompositeMatcher, DirectoryMatcher, IgnoreMatcher, IgnoreSpec, ImageTarget, PathMatcher, RepoMatcher, TargetId,
  TargetSpec,
};

/// What a target needs watched, and what to ignore.
///
/// Two values with the same id but different rules force a restart of the
/// target's watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchableTarget {
  pub id: TargetId,
  pub dependencies: Vec<PathBuf>,
  pub local_repos: Vec<PathBuf>,
  pub ignores: Vec<IgnoreSpec>,
  pub ignored_dirs: Vec<PathBuf>,
}

impl WatchableTarget {
  pub fn new(id: TargetId, dependencies: Vec<PathBuf>) -> Self {
    Self {
      id,
      dependencies,
      local_repos: Vec::new(),
      ignores: Vec::new(),
      ignored_dirs: Vec::new(),
    }
  }

  pub fn from_image(target: &ImageTarget) -> Self {
    Self {
      id: target.id(),
      dependencies: target.watched_paths(),
      local_repos: target.local_repos.clone(),
      ignores: target.ignores.clone(),
      ignored_dirs: target.ignored_dirs.clone(),
    }
  }

  /// Whether watching `other` needs exactly the same watcher as this.
  pub fn rules_match(&self, other: &WatchableTarget) -> bool {
    self.dependencies == other.dependencies
      && self.local_repos == other.local_repos
      && self.ignores == other.ignores
      && self.ignored_dirs == other.ignored_dirs
  }

  /// The target's own ignore rules: `.git` internals, ignore files, ignored dirs.
  pub fn ignore_matcher(&self) -> Result<CompositeMatcher, WatchError> {
    Ok(CompositeMatcher::new(vec![
      Arc::new(RepoMatcher::new(&self.local_repos)),
      Arc::new(IgnoreMatcher::new(&self.ignores)?),
      Arc::new(DirectoryMatcher::new(self.ignored_dirs.iter().cloned())),
    ]))
  }
}

/// Watchable targets for a target list: every image and compose target, plus
/// the configs target when there are config files.
pub fn watchable_targets(specs: &[TargetSpec], config_files: &[PathBuf]) -> Vec<WatchableTarget> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  for spec in specs {
    let watchable = match spec {
      TargetSpec::Image(t) => WatchableTarget::from_image(t),
      TargetSpec::Compose(t) => WatchableTarget::new(t.id(), t.config_paths.clone()),
      TargetSpec::K8s(_) => continue,
    };
    if seen.insert(watchable.id.clone()) {
      out.push(watchable);
    }
  }
  if !config_files.is_empty() {
    out.push(WatchableTarget::new(TargetId::configs(), config_files.to_vec()));
  }
  out
}

/// An ignore file applied to every target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GlobalIgnore {
  pub base_dir: PathBuf,
  pub contents: String,
}

/// Everything one reconciliation looks at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchInputs {
  pub targets: Vec<WatchableTarget>,
  pub global_ignore: GlobalIgnore,
}

/// What a delivery task reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
  FilesChanged { target: TargetId, files: Vec<PathBuf> },
  Error { target: TargetId, message: String },
}

/// Result of diffing desired targets against active watches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchDiff {
  pub setup: Vec<WatchableTarget>,
  pub teardown: Vec<TargetId>,
}

impl WatchDiff {
  pub fn is_empty(&self) -> bool {
    self.setup.is_empty() && self.teardown.is_empty()
  }
}

struct Registration {
  target: WatchableTarget,
  watcher: Box<dyn FileWatcher>,
  cancel: CancellationToken,
}

impl Registration {
  fn stop(mut self) {
    self.cancel.cancel();
    if let Err(e) = self.watcher.close() {
      warn!(target = %self.target.id, error = %e, "closing watcher failed");
    }
  }
}

#[derive(Default)]
struct Registry {
  watches: HashMap<TargetId, Registration>,
  global_ignore: GlobalIgnore,
  global_matcher: Option<Arc<IgnoreMatcher>>,
}

/// Owns the per-target watches.
pub struct WatchManager {
  maker: Arc<dyn WatcherMaker>,
  coalesce: CoalesceConfig,
  registry: Mutex<Registry>,
}

impl WatchManager {
  pub fn new(maker: Arc<dyn WatcherMaker>, coalesce: CoalesceConfig) -> Self {
    Self {
      maker,
      coalesce,
      registry: Mutex::new(Registry::default()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Registry> {
    self.registry.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Diff desired targets against active watches without changing anything.
  pub fn reconcile(&self, inputs: &WatchInputs) -> WatchDiff {
    diff(&self.lock(), inputs)
  }

  /// Ids of targets currently watched, sorted.
  pub fn watched_targets(&self) -> Vec<TargetId> {
    let mut ids: Vec<TargetId> = self.lock().watches.keys().cloned().collect();
    ids.sort();
    ids
  }

  /// Bring the active watches in line with `inputs`.
  ///
  /// Starts watchers for the diff's setup list, then stops the teardown
  /// list. Delivery tasks send on `dispatch`. Must be called inside a Tokio
  /// runtime.
  ///
  /// # Errors
  ///
  /// If any watcher fails to start, watchers started by this call are
  /// stopped, the previous watches stay in place, and the error is returned.
  pub fn on_change<A>(&self, inputs: &WatchInputs, dispatch: &mpsc::Sender<A>) -> Result<WatchDiff, WatchError>
  where
    A: From<WatchEvent> + Send + 'static,
  {
    let mut registry = self.lock();
    let plan = diff(&registry, inputs);
    if plan.is_empty() {
      return Ok(plan);
    }

    let global_matcher = match (&registry.global_matcher, registry.global_ignore == inputs.global_ignore) {
      (Some(matcher), true) => matcher.clone(),
      _ => {
        let spec = IgnoreSpec::parse(&inputs.global_ignore.base_dir, &inputs.global_ignore.contents);
        Arc::new(IgnoreMatcher::new(&[spec])?)
      }
    };

    let mut started: Vec<Registration> = Vec::with_capacity(plan.setup.len());
    for target in &plan.setup {
      match self.start_watch(target, global_matcher.clone(), dispatch) {
        Ok(registration) => started.push(registration),
        Err(e) => {
          started.into_iter().for_each(Registration::stop);
          return Err(e);
        }
      }
    }

    for id in &plan.teardown {
      if let Some(registration) = registry.watches.remove(id) {
        debug!(target = %id, "stopping watch");
        registration.stop();
      }
    }

    for registration in started {
      registry.watches.insert(registration.target.id.clone(), registration);
    }
    registry.global_ignore = inputs.global_ignore.clone();
    registry.global_matcher = Some(global_matcher);

    info!(
      started = plan.setup.len(),
      stopped = plan.teardown.len(),
      active = registry.watches.len(),
      "watches reconciled"
    );
    Ok(plan)
  }

  /// Stop every watch.
  pub fn close_all(&self) {
    let mut registry = self.lock();
    for (_, registration) in registry.watches.drain() {
      registration.stop();
    }
  }

  fn start_watch<A>(
    &self,
    target: &WatchableTarget,
    global: Arc<IgnoreMatcher>,
    dispatch: &mpsc::Sender<A>,
  ) -> Result<Registration, WatchError>
  where
    A: From<WatchEvent> + Send + 'static,
  {
    let ignore: Arc<dyn PathMatcher> = Arc::new(CompositeMatcher::new(vec![global, Arc::new(target.ignore_matcher()?)]));
    let mut watcher = self.maker.make(&target.dependencies, ignore)?;
    let events = watcher.take_events().ok_or(WatchError::AlreadyStarted)?;
    let errors = watcher.take_errors().ok_or(WatchError::AlreadyStarted)?;
    watcher.start()?;

    debug!(target = %target.id, paths = target.dependencies.len(), "started watch");
    let cancel = CancellationToken::new();
    tokio::spawn(deliver(
      target.id.clone(),
      events,
      errors,
      self.coalesce,
      cancel.clone(),
      dispatch.clone(),
    ));

    Ok(Registration {
      target: target.clone(),
      watcher,
      cancel,
    })
  }
}

impl Drop for WatchManager {
  fn drop(&mut self) {
    self.close_all();
  }
}

fn diff(registry: &Registry, inputs: &WatchInputs) -> WatchDiff {
  let global_changed = registry.global_ignore != inputs.global_ignore;
  let mut plan = WatchDiff::default();
  let mut desired = HashSet::new();

  for target in &inputs.targets {
    desired.insert(&target.id);
    match registry.watches.get(&target.id) {
      None => plan.setup.push(target.clone()),
      Some(existing) if global_changed || !existing.target.rules_match(target) => {
        plan.setup.push(target.clone());
        plan.teardown.push(target.id.clone());
      }
      Some(_) => {}
    }
  }

  let mut stale: Vec<TargetId> = registry
    .watches
    .keys()
    .filter(|id| !desired.contains(id))
    .cloned()
    .collect();
  stale.sort();
  plan.teardown.extend(stale);
  plan
}

async fn deliver<A>(
  target: TargetId,
  events: mpsc::UnboundedReceiver<FileEvent>,
  mut errors: mpsc::UnboundedReceiver<WatchError>,
  coalesce: CoalesceConfig,
  cancel: CancellationToken,
  dispatch: mpsc::Sender<A>,
) where
  A: From<WatchEvent> + Send + 'static,
{
  let mut batches = coalesce_events(events, coalesce);
  loop {
    let event = tokio::select! {
      _ = cancel.cancelled() => return,
      err = errors.recv() => match err {
        Some(e) => {
          warn!(target = %target, error = %e, "watch error");
          WatchEvent::Error { target: target.clone(), message: e.to_string() }
        }
        None => return,
      },
      batch = batches.recv() => match batch {
        Some(batch) => {
          let files: BTreeSet<PathBuf> = batch.into_iter().map(|e| e.path).collect();
          debug!(target = %target, files = files.len(), "files changed");
          WatchEvent::FilesChanged { target: target.clone(), files: files.into_iter().collect() }
        }
        None => return,
      },
    };
    if dispatch.send(A::from(event)).await.is_err() {
      return;
    }
  }
}
