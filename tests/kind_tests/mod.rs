//! Integration tests against a kind cluster
//!
//! These tests tell the story of how a platform operator uses vanlink against
//! a real API server.
//!
//! # Test Organization
//!
//! - `credential_store`: Stories about CA and credential lifecycle through
//!   real Secrets
//!
//! - `topology_verify`: Stories about provisioning a topology, waiting for
//!   convergence and tearing it down (slow, needs a router image)
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind credential_store -- --ignored --nocapture
//! cargo test --test kind topology_verify -- --ignored --nocapture
//! ```

mod credential_store;
mod helpers;
mod topology_verify;
