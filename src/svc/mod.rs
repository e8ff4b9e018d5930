//! Built-in behaviour installed into the default hook layers.
//!
//! - [`session`] - HELLO, NOOP, SASL PLAIN and SELECT_BUCKET
//! - [`cccp`] - GET_CLUSTER_CONFIG
//! - [`http`] - `/pools` config routes
//!
//! Anything registered here can be shadowed by an override expectation.

mod cccp;
mod http;
mod session;

use crate::core::error::CavernResult;
use crate::hooks::{HttpHookManager, KvHookManager};

/// Login accepted by SASL PLAIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "Administrator".to_string(),
            password: "password".to_string(),
        }
    }
}

/// Register the binary protocol defaults.
pub fn register_kv_defaults(hooks: &KvHookManager, credentials: Credentials) -> CavernResult<()> {
    session::register(hooks, credentials)?;
    cccp::register(hooks)
}

/// Register the HTTP defaults.
pub fn register_http_defaults(hooks: &HttpHookManager) -> CavernResult<()> {
    http::register(hooks)
}
