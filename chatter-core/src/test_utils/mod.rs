//! Test utilities and helpers
//!
//! Common fixtures and async helpers used by unit and integration tests,
//! including a failure-injecting mirror store for convergence testing.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
