//! nusprofs library crate.

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
#[cfg(any(test, feature = "harness"))]
pub mod fixtures;
pub mod render;
pub mod session;
