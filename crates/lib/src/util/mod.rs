//! Shared utilities.
//!
//! Test helpers for filesystem fixtures and archive inspection.

#[cfg(test)]
pub mod testutil;
