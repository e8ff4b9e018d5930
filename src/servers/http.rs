//! Generic HTTP server shell.
//!
//! Every request, whatever its method or path, goes to one
//! [`RequestHandler`]. A handler returning `None` produces 501.
//! The server remembers its port, so a closed server can be started again at
//! the same address.

use crate::core::error::{CavernError, CavernResult};
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Largest request body accepted.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Request as seen by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Repeated headers keep every value, in arrival order.
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: &str, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path.to_string(), None),
        };
        Self {
            method: method.to_ascii_uppercase(),
            path,
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header value, keeping any earlier values for the same name.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        append_header(&mut self.headers, name, value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }

    /// Every value of a header, in arrival order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        all_headers(&self.headers, name)
    }

    /// First value of a query parameter, undecoded.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }
}

/// Response produced by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header value; repeated names are sent as separate headers.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        append_header(&mut self.headers, name, value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        all_headers(&self.headers, name)
    }

    /// Pre-serialized JSON body.
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    /// Serialize `value` as the JSON body.
    pub fn with_json_body<T: Serialize>(self, value: &T) -> CavernResult<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    fn into_axum(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

fn append_header(headers: &mut HeaderMap, name: &str, value: String) {
    match (
        HeaderName::try_from(name),
        HeaderValue::try_from(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.append(name, value);
        }
        _ => tracing::warn!(header = %name, "dropping invalid header"),
    }
}

fn first_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn all_headers<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect()
}

/// The single function a server hands every request to.
pub type RequestHandler = Arc<dyn Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync>;

/// HTTP server configuration.
#[derive(Clone)]
pub struct HttpServerOptions {
    /// Name used in logs.
    pub service_name: String,
    pub bind: IpAddr,
    /// 0 picks an ephemeral port.
    pub port: u16,
    pub handler: RequestHandler,
    /// How long `close` waits for in-flight requests.
    pub shutdown_grace: Duration,
}

impl HttpServerOptions {
    pub fn new(handler: RequestHandler) -> Self {
        Self {
            service_name: "Unknown Service".to_string(),
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            handler,
            shutdown_grace: Duration::from_secs(1),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_bind(mut self, bind: IpAddr, port: u16) -> Self {
        self.bind = bind;
        self.port = port;
        self
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// HTTP listener dispatching to one handler.
pub struct HttpServer {
    options: HttpServerOptions,
    running: Option<Running>,
}

impl HttpServer {
    /// Create a stopped server.
    pub fn new(options: HttpServerOptions) -> Self {
        Self {
            options,
            running: None,
        }
    }

    /// Create and start a server.
    pub async fn bind(options: HttpServerOptions) -> CavernResult<Self> {
        let mut server = Self::new(options);
        server.start().await?;
        Ok(server)
    }

    pub fn service_name(&self) -> &str {
        &self.options.service_name
    }

    /// Port bound by the last start, or the configured port before that.
    pub fn listen_port(&self) -> u16 {
        self.options.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.options.bind, self.options.port)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind and begin serving.
    pub async fn start(&mut self) -> CavernResult<()> {
        if self.running.is_some() {
            return Err(CavernError::AlreadyRunning {
                service: self.options.service_name.clone(),
            });
        }

        let addr = self.local_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| CavernError::Bind { addr, source })?;
        self.options.port = listener.local_addr()?.port();

        let handler = self.options.handler.clone();
        let router = Router::new().fallback(move |request: Request| {
            let handler = handler.clone();
            async move { serve_request(handler, request).await }
        });

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let service = self.options.service_name.clone();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(service = %service, error = %e, "http server failed");
            }
        });

        tracing::info!(
            service = %self.options.service_name,
            addr = %self.local_addr(),
            "http server listening"
        );
        self.running = Some(Running { shutdown_tx, task });
        Ok(())
    }

    /// Stop accepting connections.
    ///
    /// Waits up to the grace period for in-flight requests, then abandons
    /// them. Closing a server that is not running is an error.
    pub async fn close(&mut self) -> CavernResult<()> {
        let Some(Running {
            shutdown_tx,
            mut task,
        }) = self.running.take()
        else {
            return Err(CavernError::ServerClosed {
                service: self.options.service_name.clone(),
            });
        };

        let _ = shutdown_tx.send(true);
        if tokio::time::timeout(self.options.shutdown_grace, &mut task)
            .await
            .is_err()
        {
            tracing::warn!(
                service = %self.options.service_name,
                "http server did not drain in time"
            );
            task.abort();
            let _ = task.await;
        }

        tracing::info!(service = %self.options.service_name, "http server closed");
        Ok(())
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
            running.task.abort();
        }
    }
}

async fn serve_request(handler: RequestHandler, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read http request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let request = HttpRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
    };

    let method = request.method.clone();
    let path = request.path.clone();
    let outcome = tokio::task::spawn_blocking(move || handler(&request)).await;

    match outcome {
        Ok(Some(response)) => response.into_axum(),
        Ok(None) => {
            tracing::debug!(method = %method, path = %path, "no http handler");
            StatusCode::NOT_IMPLEMENTED.into_response()
        }
        Err(e) => {
            tracing::error!(method = %method, path = %path, error = %e, "http handler panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
