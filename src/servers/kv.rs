//! Binary protocol listener.

use super::connection::KvConnection;
use super::ConnectionId;
use crate::core::error::{CavernError, CavernResult};
use crate::hooks::{KvClient, KvHooks};
use crate::topology::{ClusterHandle, NodeId};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// KV listener configuration.
#[derive(Debug, Clone)]
pub struct KvServerOptions {
    /// Node this listener belongs to.
    pub node: NodeId,
    pub bind: IpAddr,
    /// 0 picks an ephemeral port.
    pub port: u16,
    pub cluster: ClusterHandle,
    pub hooks: KvHooks,
}

impl KvServerOptions {
    pub fn new(node: NodeId, cluster: ClusterHandle, hooks: KvHooks) -> Self {
        Self {
            node,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            cluster,
            hooks,
        }
    }

    pub fn with_bind(mut self, bind: IpAddr, port: u16) -> Self {
        self.bind = bind;
        self.port = port;
        self
    }
}

/// KV listener counters.
#[derive(Debug, Default)]
pub struct KvServerMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Currently open connections.
    pub connections_active: AtomicU64,
    /// Packets answered by a handler.
    pub packets_handled: AtomicU64,
    /// Packets answered with UnknownCommand.
    pub packets_unhandled: AtomicU64,
}

impl KvServerMetrics {
    pub fn connection_accepted(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn packet_handled(&self) {
        self.packets_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_unhandled(&self) {
        self.packets_unhandled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Binary protocol listener for one node.
pub struct KvServer {
    options: KvServerOptions,
    next_conn_id: Arc<AtomicU64>,
    metrics: Arc<KvServerMetrics>,
    running: Option<Running>,
}

impl KvServer {
    pub fn new(options: KvServerOptions) -> Self {
        Self {
            options,
            next_conn_id: Arc::new(AtomicU64::new(1)),
            metrics: Arc::new(KvServerMetrics::default()),
            running: None,
        }
    }

    /// Create and start a listener.
    pub async fn bind(options: KvServerOptions) -> CavernResult<Self> {
        let mut server = Self::new(options);
        server.start().await?;
        Ok(server)
    }

    pub fn node(&self) -> NodeId {
        self.options.node
    }

    pub fn listen_port(&self) -> u16 {
        self.options.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.options.bind, self.options.port)
    }

    pub fn metrics(&self) -> &Arc<KvServerMetrics> {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind and begin accepting connections.
    pub async fn start(&mut self) -> CavernResult<()> {
        if self.running.is_some() {
            return Err(self.already_running());
        }

        let addr = self.local_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| CavernError::Bind { addr, source })?;
        self.options.port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            self.options.clone(),
            self.next_conn_id.clone(),
            self.metrics.clone(),
            shutdown_rx,
        ));

        tracing::info!(node = %self.options.node, addr = %self.local_addr(), "kv server listening");
        self.running = Some(Running { shutdown_tx, task });
        Ok(())
    }

    /// Stop accepting and tell open connections to finish.
    ///
    /// Returns once the listener is released. A packet already being handled
    /// completes; no further packets are dispatched.
    pub async fn close(&mut self) -> CavernResult<()> {
        let Some(running) = self.running.take() else {
            return Err(CavernError::ServerClosed {
                service: format!("kv {}", self.options.node),
            });
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.task.await {
            tracing::error!(node = %self.options.node, error = %e, "kv accept loop panicked");
        }
        tracing::info!(node = %self.options.node, "kv server closed");
        Ok(())
    }

    fn already_running(&self) -> CavernError {
        CavernError::AlreadyRunning {
            service: format!("kv {}", self.options.node),
        }
    }
}

impl Drop for KvServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
            running.task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    options: KvServerOptions,
    next_conn_id: Arc<AtomicU64>,
    metrics: Arc<KvServerMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(node = %options.node, error = %e, "accept failed");
                        // Out of descriptors: give connections a chance to close.
                        tokio::select! {
                            _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                };
                let _ = stream.set_nodelay(true);

                let id = ConnectionId(next_conn_id.fetch_add(1, Ordering::Relaxed));
                metrics.connection_accepted();

                let connection = KvConnection::new(
                    KvClient::new(id, options.node, Some(remote_addr)),
                    stream,
                    options.cluster.clone(),
                    options.hooks.clone(),
                    metrics.clone(),
                    shutdown_rx.clone(),
                );
                tokio::spawn(connection.run());
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counters() {
        let metrics = KvServerMetrics::default();

        metrics.connection_accepted();
        metrics.connection_accepted();
        assert_eq!(metrics.active_connections(), 2);
        assert_eq!(metrics.connections_total.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections(), 1);

        metrics.packet_handled();
        metrics.packet_unhandled();
        assert_eq!(metrics.packets_handled.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.packets_unhandled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_and_close() {
        let options = KvServerOptions::new(NodeId(0), ClusterHandle::new(), KvHooks::new());
        let mut server = KvServer::bind(options).await.unwrap();
        assert!(server.listen_port() > 0);
        assert!(server.is_running());

        server.close().await.unwrap();
        assert!(!server.is_running());
        assert!(matches!(
            server.close().await.unwrap_err(),
            CavernError::ServerClosed { .. }
        ));
    }
}
