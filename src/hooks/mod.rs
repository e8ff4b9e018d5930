//! Request interception.
//!
//! Tests register expectations that match incoming requests and decide how to
//! answer them. Expectations live in scopes; at dispatch the scopes are
//! searched most specific first and, within a scope, newest first. The first
//! match runs with a `next` continuation it may call to defer to the rest of
//! the chain.
//!
//! - [`kv`] - binary protocol expectations and dispatch
//! - [`http`] - HTTP expectations and the per-server request handler

pub mod http;
pub mod kv;

pub use http::{HttpContext, HttpHookManager, HttpHooks, HttpNext, PathPattern};
pub use kv::{KvClient, KvContext, KvHookManager, KvHooks, Next, PacketMatcher};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies a registered expectation within its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookHandle(u64);

impl std::fmt::Display for HookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hook-{}", self.0)
    }
}

/// Outcome of claiming an invocation of an expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// The handler may run; `exhausted` means this was its last invocation.
    Granted { exhausted: bool },
    /// Its invocations were used up, possibly by another connection.
    Spent,
}

/// How many times an expectation may fire.
#[derive(Debug)]
pub(crate) struct FireLimit {
    limit: Option<u32>,
    fired: AtomicU32,
}

impl FireLimit {
    pub(crate) fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            fired: AtomicU32::new(0),
        }
    }

    pub(crate) fn claim(&self) -> Claim {
        let Some(limit) = self.limit else {
            self.fired.fetch_add(1, Ordering::Relaxed);
            return Claim::Granted { exhausted: false };
        };

        match self
            .fired
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |fired| {
                (fired < limit).then_some(fired + 1)
            }) {
            Ok(prev) => Claim::Granted {
                exhausted: prev + 1 == limit,
            },
            Err(_) => Claim::Spent,
        }
    }

    #[cfg(test)]
    pub(crate) fn fired(&self) -> u32 {
        self.fired.load(Ordering::Relaxed)
    }
}

/// Entries that can be stored in a [`HookList`].
pub(crate) trait Registered {
    fn handle(&self) -> HookHandle;
}

/// Copy-on-write list of expectations in registration order.
///
/// Dispatch reads a snapshot without locking; registration and removal are
/// serialized and publish a new list.
pub(crate) struct HookList<T> {
    entries: ArcSwap<Vec<Arc<T>>>,
    writer: Mutex<()>,
    next_id: AtomicU64,
}

impl<T: Registered> HookList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_handle(&self) -> HookHandle {
        HookHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn push(&self, entry: Arc<T>) {
        let _guard = self.writer.lock();
        let mut next = Vec::clone(&self.entries.load());
        next.push(entry);
        self.entries.store(Arc::new(next));
    }

    pub(crate) fn remove(&self, handle: HookHandle) -> bool {
        let _guard = self.writer.lock();
        let current = self.entries.load();
        if !current.iter().any(|e| e.handle() == handle) {
            return false;
        }
        let next: Vec<Arc<T>> = current
            .iter()
            .filter(|e| e.handle() != handle)
            .cloned()
            .collect();
        self.entries.store(Arc::new(next));
        true
    }

    pub(crate) fn clear(&self) {
        let _guard = self.writer.lock();
        self.entries.store(Arc::new(Vec::new()));
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.entries.load_full()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.load().len()
    }
}
