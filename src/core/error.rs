//! Error types and protocol status mapping.
//!
//! Library code returns [`CavernError`]; the CLI and runtime bootstrap wrap
//! these in `anyhow` with context.

use crate::memd::Status;
use crate::topology::NodeId;
use std::net::SocketAddr;
use thiserror::Error;

/// Common Cavern error conditions.
#[derive(Debug, Error)]
pub enum CavernError {
    /// The requesting node is not part of the cluster.
    #[error("unknown node: {node_id}")]
    UnknownNode { node_id: NodeId },

    /// The named bucket does not exist.
    #[error("bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    /// A bucket with this name already exists.
    #[error("bucket already exists: {bucket}")]
    BucketExists { bucket: String },

    /// The topology is internally inconsistent.
    #[error("invalid topology: {message}")]
    InvalidTopology { message: String },

    /// A handler attempted to write a second response for one request.
    #[error("response already written for opaque {opaque:#010x}")]
    ResponseAlreadyWritten { opaque: u32 },

    /// An expectation was built without its required magic/command.
    #[error("incomplete expectation: {message}")]
    IncompleteExpectation { message: String },

    /// Listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Operation on a server that is not running.
    #[error("{service} server is not running")]
    ServerClosed { service: String },

    /// Start on a server that is already running.
    #[error("{service} server is already running")]
    AlreadyRunning { service: String },

    /// Handler-level failure.
    #[error("handler failed: {message}")]
    Handler { message: String },

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CavernError {
    /// Create an InvalidTopology error.
    pub fn invalid_topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// Create a Handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a BucketNotFound error.
    pub fn bucket_not_found(bucket: impl Into<String>) -> Self {
        Self::BucketNotFound {
            bucket: bucket.into(),
        }
    }

    /// Binary protocol status that best describes this error.
    pub fn status(&self) -> Status {
        match self {
            Self::BucketNotFound { .. } => Status::NoBucket,
            Self::UnknownNode { .. } | Self::InvalidTopology { .. } => Status::InternalError,
            Self::ServerClosed { .. } => Status::TmpFail,
            _ => Status::UnknownCommand,
        }
    }
}

/// Result type using CavernError.
pub type CavernResult<T> = Result<T, CavernError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CavernError::UnknownNode {
            node_id: NodeId(7),
        };
        assert_eq!(err.to_string(), "unknown node: node-7");

        let err = CavernError::ResponseAlreadyWritten { opaque: 0x2a };
        assert_eq!(err.to_string(), "response already written for opaque 0x0000002a");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(CavernError::bucket_not_found("b").status(), Status::NoBucket);
        assert_eq!(
            CavernError::invalid_topology("dangling").status(),
            Status::InternalError
        );
        assert_eq!(CavernError::handler("boom").status(), Status::UnknownCommand);
    }
}
