//! Network shells.
//!
//! - [`kv`] - binary protocol listener, one task per connection
//! - [`connection`] - the per-connection read/dispatch/write loop
//! - [`http`] - HTTP listener with a single request handler

pub mod connection;
pub mod http;
pub mod kv;

pub use http::{HttpRequest, HttpResponse, HttpServer, HttpServerOptions, RequestHandler};
pub use kv::{KvServer, KvServerMetrics, KvServerOptions};

/// Connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
