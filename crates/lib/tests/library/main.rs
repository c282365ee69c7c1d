//! Library integration tests: whole build cycles against the in-process fakes.

mod common;

mod chain_tests;
mod engine_tests;
mod image_tests;
mod live_update_tests;
