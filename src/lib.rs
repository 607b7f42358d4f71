//! Vanlink - provisions and verifies multi-site application networks
//!
//! Vanlink stands up a declared topology of sites, each with its own router,
//! wires them together with mutually authenticated links, and waits for every
//! router to report the expected number of connected sites.
//!
//! # Architecture
//!
//! - Every interior site owns a CA and exports one connection token signed by it
//! - Any site may import a peer's token to register a connector that dials the peer
//! - Edge sites only dial out; they never export a token
//! - All cluster access goes through the [`platform`] traits, so the core runs
//!   unchanged against Kubernetes or an in-memory simulation
//!
//! # Modules
//!
//! - [`pki`] - Certificate generation, parsing and signature checks
//! - [`platform`] - Platform seams plus Kubernetes and in-memory implementations
//! - [`credentials`] - CA and credential lifecycle on top of secret storage
//! - [`token`] - Connection token export and import
//! - [`topology`] - Declared topologies, provisioning and teardown
//! - [`convergence`] - Waiting for routers to report expected connectivity
//! - [`config`] - Topology file loading
//! - [`telemetry`] - Logging initialization
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod convergence;
pub mod credentials;
pub mod error;
pub mod pki;
pub mod platform;
pub mod telemetry;
pub mod token;
pub mod topology;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
