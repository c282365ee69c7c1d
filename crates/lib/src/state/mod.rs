//! Build results and the per-target state carried between cycles.

mod types;

pub use types::{BuildResult, BuildResultSet, BuildState, BuildStateSet, ContainerInfo};
