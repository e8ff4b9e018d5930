//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Cluster assembly and server lifecycle
//! - [`error`] - Error types and status mapping

pub mod config;
pub mod error;
pub mod runtime;
