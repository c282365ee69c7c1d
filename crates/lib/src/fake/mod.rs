//! In-process implementations of every external collaborator.
//!
//! They record each call and can be scripted to fail, so engine behavior can
//! be asserted without a container runtime, cluster, or real filesystem
//! watcher.

mod agent;
mod cluster;
mod runtime;
mod watcher;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use agent::{FakeAgentClient, FakeAgentConnector};
pub use cluster::{FakeCluster, FakeCompose};
pub use runtime::{EXAMPLE_BUILD_OUTPUT, EXAMPLE_BUILD_OUTPUT_LEGACY, EXAMPLE_DIGEST, EXAMPLE_SHORT_ID, FakeRuntime};
pub use watcher::{FakeWatcher, FakeWatcherHandle, FakeWatcherMaker};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
