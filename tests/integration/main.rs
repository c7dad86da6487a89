// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Integration tests for kube-resourceless
//!
//! These tests start the real TLS webhook server on an ephemeral loopback
//! port with freshly generated certificates and talk to it over raw TLS
//! connections. No Kubernetes cluster is required.
//!
//! ```bash
//! cargo test --test integration
//! ```

// Shared test fixtures (used by unit, integration, and proptest)
#[path = "../common/mod.rs"]
mod common;

// Test infrastructure modules
mod server;

mod rotation_tests;

pub use server::*;
