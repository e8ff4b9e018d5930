//! Binary protocol expectations and dispatch.
//!
//! ```ignore
//! hooks.overrides().expect()
//!     .magic(Magic::Req)
//!     .cmd(Command::GetClusterConfig)
//!     .once()
//!     .handler(|ctx, pkt, _next| {
//!         ctx.write_packet(Packet::response_to(pkt).with_status(Status::TmpFail))
//!     })?;
//! ```

use super::{Claim, FireLimit, HookHandle, HookList, Registered};
use crate::core::error::{CavernError, CavernResult};
use crate::memd::{Command, HelloFeature, Magic, Packet};
use crate::servers::ConnectionId;
use crate::topology::{ClusterHandle, NodeId};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Handler invoked for a matched packet.
///
/// Calling `next.call(ctx, packet)` runs the rest of the chain; returning
/// without calling it ends the chain.
pub type KvHandler =
    dyn Fn(&mut KvContext<'_>, &Packet, Next<'_>) -> CavernResult<()> + Send + Sync;

/// Which packets an expectation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMatcher {
    pub magic: Magic,
    pub command: Command,
    pub key: Option<Bytes>,
    pub vbucket: Option<u16>,
    pub datatype: Option<u8>,
    /// Leading key bytes, such as an encoded collection id.
    pub collection: Option<Bytes>,
}

impl PacketMatcher {
    /// Whether `packet` satisfies every refinement.
    pub fn matches(&self, packet: &Packet) -> bool {
        packet.magic == self.magic
            && packet.command == self.command
            && self.key.as_ref().map_or(true, |k| *k == packet.key)
            && self.vbucket.map_or(true, |v| v == packet.vbucket)
            && self.datatype.map_or(true, |d| d == packet.datatype)
            && self
                .collection
                .as_ref()
                .map_or(true, |prefix| packet.key.starts_with(prefix))
    }
}

/// A registered matcher, handler and fire limit.
pub struct Expectation {
    handle: HookHandle,
    matcher: PacketMatcher,
    limit: FireLimit,
    handler: Box<KvHandler>,
}

impl Registered for Expectation {
    fn handle(&self) -> HookHandle {
        self.handle
    }
}

impl std::fmt::Debug for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expectation")
            .field("handle", &self.handle)
            .field("matcher", &self.matcher)
            .field("limit", &self.limit)
            .finish()
    }
}

/// One scope of binary protocol expectations.
pub struct KvHookManager {
    hooks: HookList<Expectation>,
}

impl Default for KvHookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KvHookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvHookManager")
            .field("len", &self.len())
            .finish()
    }
}

impl KvHookManager {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self {
            hooks: HookList::new(),
        }
    }

    /// Start building an expectation in this scope.
    pub fn expect(&self) -> ExpectationBuilder<'_> {
        ExpectationBuilder {
            manager: self,
            magic: None,
            command: None,
            key: None,
            vbucket: None,
            datatype: None,
            collection: None,
            limit: None,
        }
    }

    /// Remove an expectation. Returns whether it was still registered.
    pub fn remove(&self, handle: HookHandle) -> bool {
        self.hooks.remove(handle)
    }

    /// Remove every expectation.
    pub fn clear(&self) {
        self.hooks.clear()
    }

    /// Number of registered expectations.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no expectations are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fluent builder returned by [`KvHookManager::expect`].
#[must_use = "an expectation is only registered by calling .handler()"]
pub struct ExpectationBuilder<'m> {
    manager: &'m KvHookManager,
    magic: Option<Magic>,
    command: Option<Command>,
    key: Option<Bytes>,
    vbucket: Option<u16>,
    datatype: Option<u8>,
    collection: Option<Bytes>,
    limit: Option<u32>,
}

impl ExpectationBuilder<'_> {
    pub fn magic(mut self, magic: Magic) -> Self {
        self.magic = Some(magic);
        self
    }

    pub fn cmd(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn vbucket(mut self, vbucket: u16) -> Self {
        self.vbucket = Some(vbucket);
        self
    }

    pub fn datatype(mut self, datatype: u8) -> Self {
        self.datatype = Some(datatype);
        self
    }

    /// Match keys in collection `cid`, whose id prefixes the key as ULEB128.
    pub fn collection(mut self, cid: u32) -> Self {
        self.collection = Some(encode_collection_id(cid));
        self
    }

    /// Match keys starting with `prefix`.
    pub fn key_prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.collection = Some(prefix.into());
        self
    }

    /// Fire once, then unregister.
    pub fn once(self) -> Self {
        self.times(1)
    }

    /// Fire `n` times, then unregister.
    pub fn times(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Register `handler` and return its handle.
    pub fn handler<F>(self, handler: F) -> CavernResult<HookHandle>
    where
        F: Fn(&mut KvContext<'_>, &Packet, Next<'_>) -> CavernResult<()> + Send + Sync + 'static,
    {
        let (Some(magic), Some(command)) = (self.magic, self.command) else {
            return Err(CavernError::IncompleteExpectation {
                message: "magic and cmd are required".to_string(),
            });
        };

        let handle = self.manager.hooks.next_handle();
        self.manager.hooks.push(Arc::new(Expectation {
            handle,
            matcher: PacketMatcher {
                magic,
                command,
                key: self.key,
                vbucket: self.vbucket,
                datatype: self.datatype,
                collection: self.collection,
            },
            limit: FireLimit::new(self.limit),
            handler: Box::new(handler),
        }));
        Ok(handle)
    }
}

fn encode_collection_id(mut cid: u32) -> Bytes {
    let mut out = Vec::with_capacity(5);
    loop {
        let byte = (cid & 0x7f) as u8;
        cid >>= 7;
        if cid == 0 {
            out.push(byte);
            return Bytes::from(out);
        }
        out.push(byte | 0x80);
    }
}

/// State of one binary protocol connection, visible to handlers.
pub struct KvClient {
    id: ConnectionId,
    node: NodeId,
    remote_addr: Option<SocketAddr>,
    selected_bucket: Option<String>,
    features: BTreeSet<HelloFeature>,
    user: Option<String>,
    hooks: Arc<KvHookManager>,
}

impl KvClient {
    /// Create the state for a connection accepted by `node`.
    pub fn new(id: ConnectionId, node: NodeId, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            node,
            remote_addr,
            selected_bucket: None,
            features: BTreeSet::new(),
            user: None,
            hooks: Arc::new(KvHookManager::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Node that accepted this connection.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn selected_bucket(&self) -> Option<&str> {
        self.selected_bucket.as_deref()
    }

    pub fn select_bucket(&mut self, bucket: impl Into<String>) {
        self.selected_bucket = Some(bucket.into());
    }

    pub fn deselect_bucket(&mut self) {
        self.selected_bucket = None;
    }

    /// Features agreed with HELLO.
    pub fn features(&self) -> &BTreeSet<HelloFeature> {
        &self.features
    }

    pub fn set_features(&mut self, features: BTreeSet<HelloFeature>) {
        self.features = features;
    }

    pub fn has_feature(&self, feature: HelloFeature) -> bool {
        self.features.contains(&feature)
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = Some(user.into());
    }

    /// Expectations that apply to this connection only.
    pub fn hooks(&self) -> &Arc<KvHookManager> {
        &self.hooks
    }
}

/// Per-dispatch context handed to handlers.
pub struct KvContext<'a> {
    pub client: &'a mut KvClient,
    cluster: &'a ClusterHandle,
    response: Option<Packet>,
    delay: Option<Duration>,
    disconnect: bool,
}

impl<'a> KvContext<'a> {
    pub fn new(client: &'a mut KvClient, cluster: &'a ClusterHandle) -> Self {
        Self {
            client,
            cluster,
            response: None,
            delay: None,
            disconnect: false,
        }
    }

    pub fn cluster(&self) -> &ClusterHandle {
        self.cluster
    }

    /// Queue the response for this request.
    ///
    /// Only the first write is kept; later writes fail with
    /// [`CavernError::ResponseAlreadyWritten`].
    pub fn write_packet(&mut self, packet: Packet) -> CavernResult<()> {
        if let Some(existing) = &self.response {
            return Err(CavernError::ResponseAlreadyWritten {
                opaque: existing.opaque,
            });
        }
        self.response = Some(packet);
        Ok(())
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn take_response(&mut self) -> Option<Packet> {
        self.response.take()
    }

    /// Hold the response back for `delay` before sending it.
    pub fn delay_response(&mut self, delay: Duration) {
        self.delay = Some(delay);
    }

    pub fn response_delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Drop the connection after this request instead of answering.
    pub fn disconnect(&mut self) {
        self.disconnect = true;
    }

    pub fn should_disconnect(&self) -> bool {
        self.disconnect
    }
}

struct Candidate {
    expectation: Arc<Expectation>,
    owner: Arc<KvHookManager>,
}

/// Matching expectations for one packet, in invocation order.
pub struct HookChain {
    candidates: Vec<Candidate>,
}

impl HookChain {
    fn collect(layers: &[&Arc<KvHookManager>], packet: &Packet) -> Self {
        let mut candidates = Vec::new();
        for layer in layers {
            let snapshot = layer.hooks.snapshot();
            for expectation in snapshot.iter().rev() {
                if expectation.matcher.matches(packet) {
                    candidates.push(Candidate {
                        expectation: expectation.clone(),
                        owner: Arc::clone(layer),
                    });
                }
            }
        }
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn run_from(
        &self,
        start: usize,
        ctx: &mut KvContext<'_>,
        packet: &Packet,
    ) -> CavernResult<()> {
        for (index, candidate) in self.candidates.iter().enumerate().skip(start) {
            let expectation = &candidate.expectation;
            match expectation.limit.claim() {
                Claim::Spent => continue,
                Claim::Granted { exhausted } => {
                    if exhausted {
                        candidate.owner.remove(expectation.handle);
                    }
                    tracing::trace!(
                        hook = %expectation.handle,
                        command = %packet.command,
                        opaque = packet.opaque,
                        "invoking kv hook"
                    );
                    let next = Next {
                        chain: self,
                        cursor: index + 1,
                    };
                    return (expectation.handler)(ctx, packet, next);
                }
            }
        }
        Ok(())
    }
}

/// Continuation into the remainder of a [`HookChain`].
pub struct Next<'c> {
    chain: &'c HookChain,
    cursor: usize,
}

impl Next<'_> {
    /// Run the next matching handler, if any.
    pub fn call(self, ctx: &mut KvContext<'_>, packet: &Packet) -> CavernResult<()> {
        self.chain.run_from(self.cursor, ctx, packet)
    }

    /// Candidates left after this point.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.cursor)
    }
}

/// The shared scopes every binary connection dispatches through.
///
/// Per-connection scopes are searched first, then `overrides`, then
/// `defaults`.
#[derive(Debug, Clone, Default)]
pub struct KvHooks {
    defaults: Arc<KvHookManager>,
    overrides: Arc<KvHookManager>,
}

impl KvHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in protocol behaviour.
    pub fn defaults(&self) -> &KvHookManager {
        &self.defaults
    }

    /// Test-installed behaviour shared by every connection.
    pub fn overrides(&self) -> &KvHookManager {
        &self.overrides
    }

    /// Run `packet` through the matching handlers.
    ///
    /// Returns whether a response was written. Handler errors propagate after
    /// the chain stops; a response written before the error is kept.
    pub fn dispatch(&self, ctx: &mut KvContext<'_>, packet: &Packet) -> CavernResult<bool> {
        let connection = Arc::clone(ctx.client.hooks());
        let chain = HookChain::collect(&[&connection, &self.overrides, &self.defaults], packet);

        if chain.is_empty() {
            tracing::debug!(
                conn = %ctx.client.id(),
                command = %packet.command,
                opaque = packet.opaque,
                "no kv hook matched"
            );
            return Ok(false);
        }

        chain.run_from(0, ctx, packet)?;
        Ok(ctx.has_response())
    }
}
