//! devloop-lib: the build and deploy reconciliation engine.
//!
//! Source edits are watched, coalesced, and attributed to targets. Each build
//! cycle tries the cheapest strategy first:
//! - live update: copy changed files into running containers and run steps
//! - image: rebuild images, tag them by digest, and deploy to Kubernetes
//! - compose: rebuild images and bring compose services up
//!
//! Per-target [`state::BuildState`] carries what was last deployed and what
//! changed since, so each cycle only rebuilds what it must.

pub mod build;
pub mod config;
pub mod consts;
pub mod digest;
pub mod engine;
pub mod fake;
pub mod liveupdate;
pub mod model;
pub mod runtime;
pub mod state;
pub mod sync;
pub mod util;
pub mod watch;
