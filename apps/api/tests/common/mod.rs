//! Common test utilities for API integration tests
//!
//! Shared fixtures (seeded users, an in-memory application) and helpers for
//! building requests and reading responses.

#![allow(unused_imports)]

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
