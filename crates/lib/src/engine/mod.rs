//! The engine loop.
//!
//! Watch events and pod observations become [`EngineAction`]s on one channel.
//! The [`BuildController`] folds them into its build state and runs at most
//! one build cycle at a time; a failed cycle waits for the next file change
//! before it retries. A configuration edit hands control back to the caller,
//! which reloads its targets and tears down deploys that disappeared.

mod controller;
mod pods;
mod reload;

pub use controller::{BuildController, EngineAction, RunExit};
pub use pods::{PodTracker, forward_pod_events, managed_selector};
pub use reload::remove_stale_deploys;
