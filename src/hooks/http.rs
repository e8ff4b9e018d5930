//! HTTP expectations.
//!
//! Each HTTP server takes a single request handler. [`HttpHooks`] builds that
//! handler for one node: it runs matching override expectations newest first,
//! then the defaults, with the same `next` fallthrough as the binary side.

use super::{Claim, FireLimit, HookHandle, HookList, Registered};
use crate::core::error::{CavernError, CavernResult};
use crate::servers::http::{HttpRequest, HttpResponse, RequestHandler};
use crate::topology::{ClusterHandle, NodeId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handler invoked for a matched request. `None` lets the server answer 501.
pub type HttpHandler =
    dyn Fn(&HttpContext<'_>, &HttpRequest, HttpNext<'_>) -> Option<HttpResponse> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest,
}

/// Path template such as `/pools/default/b/{bucket}`.
///
/// `{name}` captures one segment; a final `*` matches any remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .map(|seg| {
                if seg == "*" {
                    Segment::Rest
                } else if let Some(name) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}'))
                {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Captured parameters if `path` matches.
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        let mut parts = split_path(path);

        for segment in &self.segments {
            match segment {
                Segment::Rest => return Some(params),
                Segment::Literal(lit) => {
                    if parts.next()? != lit {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), parts.next()?.to_string());
                }
            }
        }

        parts.next().is_none().then_some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

struct HttpExpectation {
    handle: HookHandle,
    method: Option<String>,
    path: PathPattern,
    limit: FireLimit,
    handler: Box<HttpHandler>,
}

impl Registered for HttpExpectation {
    fn handle(&self) -> HookHandle {
        self.handle
    }
}

/// One scope of HTTP expectations.
pub struct HttpHookManager {
    hooks: HookList<HttpExpectation>,
}

impl Default for HttpHookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpHookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHookManager")
            .field("len", &self.hooks.len())
            .finish()
    }
}

impl HttpHookManager {
    pub fn new() -> Self {
        Self {
            hooks: HookList::new(),
        }
    }

    pub fn expect(&self) -> HttpExpectationBuilder<'_> {
        HttpExpectationBuilder {
            manager: self,
            method: None,
            path: None,
            limit: None,
        }
    }

    pub fn remove(&self, handle: HookHandle) -> bool {
        self.hooks.remove(handle)
    }

    pub fn clear(&self) {
        self.hooks.clear()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[must_use = "an expectation is only registered by calling .handler()"]
pub struct HttpExpectationBuilder<'m> {
    manager: &'m HttpHookManager,
    method: Option<String>,
    path: Option<PathPattern>,
    limit: Option<u32>,
}

impl HttpExpectationBuilder<'_> {
    /// Restrict to one method (case-insensitive).
    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_ascii_uppercase());
        self
    }

    pub fn path(mut self, pattern: &str) -> Self {
        self.path = Some(PathPattern::parse(pattern));
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn times(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn handler<F>(self, handler: F) -> CavernResult<HookHandle>
    where
        F: Fn(&HttpContext<'_>, &HttpRequest, HttpNext<'_>) -> Option<HttpResponse>
            + Send
            + Sync
            + 'static,
    {
        let Some(path) = self.path else {
            return Err(CavernError::IncompleteExpectation {
                message: "path is required".to_string(),
            });
        };

        let handle = self.manager.hooks.next_handle();
        self.manager.hooks.push(Arc::new(HttpExpectation {
            handle,
            method: self.method,
            path,
            limit: FireLimit::new(self.limit),
            handler: Box::new(handler),
        }));
        Ok(handle)
    }
}

/// What a handler knows about the request beyond the request itself.
pub struct HttpContext<'a> {
    node: NodeId,
    cluster: &'a ClusterHandle,
    params: BTreeMap<String, String>,
}

impl HttpContext<'_> {
    /// Node whose server received the request.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn cluster(&self) -> &ClusterHandle {
        self.cluster
    }

    /// A `{name}` capture from the matched path pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

struct Candidate {
    expectation: Arc<HttpExpectation>,
    owner: Arc<HttpHookManager>,
    params: BTreeMap<String, String>,
}

struct HttpChain<'a> {
    node: NodeId,
    cluster: &'a ClusterHandle,
    candidates: Vec<Candidate>,
}

impl HttpChain<'_> {
    fn run_from(&self, start: usize, request: &HttpRequest) -> Option<HttpResponse> {
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
                        method = %request.method,
                        path = %request.path,
                        "invoking http hook"
                    );
                    let ctx = HttpContext {
                        node: self.node,
                        cluster: self.cluster,
                        params: candidate.params.clone(),
                    };
                    let next = HttpNext {
                        chain: self,
                        cursor: index + 1,
                    };
                    return (expectation.handler)(&ctx, request, next);
                }
            }
        }
        None
    }
}

/// Continuation into the remaining HTTP handlers.
pub struct HttpNext<'c> {
    chain: &'c HttpChain<'c>,
    cursor: usize,
}

impl HttpNext<'_> {
    pub fn call(self, request: &HttpRequest) -> Option<HttpResponse> {
        self.chain.run_from(self.cursor, request)
    }
}

/// Default and override scopes for HTTP services.
#[derive(Debug, Clone, Default)]
pub struct HttpHooks {
    defaults: Arc<HttpHookManager>,
    overrides: Arc<HttpHookManager>,
}

impl HttpHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults(&self) -> &HttpHookManager {
        &self.defaults
    }

    pub fn overrides(&self) -> &HttpHookManager {
        &self.overrides
    }

    /// Dispatch one request as received by `node`.
    pub fn dispatch(
        &self,
        node: NodeId,
        cluster: &ClusterHandle,
        request: &HttpRequest,
    ) -> Option<HttpResponse> {
        let mut candidates = Vec::new();
        for layer in [&self.overrides, &self.defaults] {
            for expectation in layer.hooks.snapshot().iter().rev() {
                if let Some(method) = &expectation.method {
                    if !method.eq_ignore_ascii_case(&request.method) {
                        continue;
                    }
                }
                if let Some(params) = expectation.path.matches(&request.path) {
                    candidates.push(Candidate {
                        expectation: expectation.clone(),
                        owner: Arc::clone(layer),
                        params,
                    });
                }
            }
        }

        if candidates.is_empty() {
            tracing::debug!(
                node = %node,
                method = %request.method,
                path = %request.path,
                "no http hook matched"
            );
            return None;
        }

        HttpChain {
            node,
            cluster,
            candidates,
        }
        .run_from(0, request)
    }

    /// The request handler for the HTTP server of `node`.
    pub fn request_handler(&self, node: NodeId, cluster: ClusterHandle) -> RequestHandler {
        let hooks = self.clone();
        Arc::new(move |request: &HttpRequest| hooks.dispatch(node, &cluster, request))
    }
}
