// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the admission engine.
//!
//! These tests drive whole admission decisions through the public engine API
//! with an in-memory configuration cache. No cluster is required.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_empty_pod_gets_one_seccomp_patch
//! ```
//!
//! ## Test Categories
//!
//! - **Scenario tests**: the reference admission scenarios for the seccomp
//!   and token controls
//! - **Round trip tests**: mutate, apply the patch, then validate
//! - **Config cache tests**: configuration changes observed between requests

#[path = "../common/mod.rs"]
mod common;

mod config_cache_tests;
