//! Cavern - a mock Couchbase cluster for SDK testing.
//!
//! Cavern runs a configurable set of nodes, each with a binary protocol (KV)
//! listener and a management HTTP listener. Every request is routed through
//! layered hook managers so tests can intercept, rewrite, delay or drop any
//! packet, then fall through to the built-in behaviour.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │        KvServer (per node)     │   HttpServer (per node)  │
//! └───────────────────────────────────────────────────────────┘
//!                  │                              │
//! ┌───────────────────────────────────────────────────────────┐
//! │  hooks: connection → overrides → defaults, newest first   │
//! └───────────────────────────────────────────────────────────┘
//!                  │                              │
//! ┌───────────────────────────────────────────────────────────┐
//! │      svc: HELLO, SASL, SELECT_BUCKET, CCCP, /pools        │
//! └───────────────────────────────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────────────────────────────────┐
//! │  topology: revisioned cluster snapshot + config generator │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Cluster assembly and server lifecycle
//! - [`core::error`] - Error types and status mapping
//! - [`memd`] - Binary protocol packets and framing
//! - [`topology`] - Nodes, buckets, vbucket maps and config JSON
//! - [`hooks`] - KV and HTTP hook managers
//! - [`svc`] - Default protocol behaviour
//! - [`servers`] - KV and HTTP listeners
//! - [`cli::commands`] - CLI command implementations

// Core infrastructure
pub mod core;

// Binary protocol
pub mod memd;

// Cluster model
pub mod topology;

// Request interception
pub mod hooks;

// Built-in services
pub mod svc;

// Listeners
pub mod servers;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use self::core::error::{CavernError, CavernResult};
