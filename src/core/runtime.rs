//! Main runtime orchestration.
//!
//! The runtime owns the mock cluster:
//! - Build order: topology → default hooks → per-node servers
//! - Each node gets a KV listener if it runs `kv` and a management HTTP
//!   listener if it runs `mgmt`; bound ports are published into the topology
//! - Shutdown closes every listener

use crate::core::config::Config;
use crate::hooks::{HttpHooks, KvHooks};
use crate::servers::{HttpServer, HttpServerOptions, KvServer, KvServerOptions};
use crate::svc::{self, Credentials};
use crate::topology::{ClusterHandle, Network, NodeId, ServiceType};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Servers belonging to one node.
struct NodeServers {
    id: NodeId,
    kv: Option<KvServer>,
    http: Option<HttpServer>,
}

/// Cavern runtime holding the cluster and its servers.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Shared topology.
    cluster: ClusterHandle,

    /// Binary protocol hooks shared by every KV listener.
    kv_hooks: KvHooks,

    /// HTTP hooks shared by every management listener.
    http_hooks: HttpHooks,

    /// Node ids in configuration order.
    node_ids: Vec<NodeId>,

    /// Running servers.
    nodes: Vec<NodeServers>,
}

impl Runtime {
    /// Build the topology and default hooks. No sockets are opened.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let cluster = ClusterHandle::new();
        let mut node_ids = Vec::with_capacity(config.nodes.len());
        for node in &config.nodes {
            let id = cluster
                .add_node(node.hostname.clone(), &node.services)
                .with_context(|| format!("failed to add node {}", node.hostname))?;
            for (network, alt) in &node.alternate_addresses {
                cluster.set_alternate_address(id, network.clone(), alt.to_address()?)?;
            }
            let network = Network::from_name(&node.network);
            if network != Network::Default {
                cluster.set_node_network(id, network)?;
            }
            node_ids.push(id);
        }
        for bucket in &config.buckets {
            cluster
                .add_bucket(bucket.to_spec())
                .with_context(|| format!("failed to create bucket {}", bucket.name))?;
        }

        let kv_hooks = KvHooks::new();
        svc::register_kv_defaults(
            kv_hooks.defaults(),
            Credentials {
                username: config.auth.username.clone(),
                password: config.auth.password.clone(),
            },
        )?;
        let http_hooks = HttpHooks::new();
        svc::register_http_defaults(http_hooks.defaults())?;

        Ok(Self {
            config: Arc::new(config),
            cluster,
            kv_hooks,
            http_hooks,
            node_ids,
            nodes: Vec::new(),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared cluster topology.
    pub fn cluster(&self) -> &ClusterHandle {
        &self.cluster
    }

    /// Binary protocol hooks; register test expectations on `overrides()`.
    pub fn kv_hooks(&self) -> &KvHooks {
        &self.kv_hooks
    }

    /// HTTP hooks; register test expectations on `overrides()`.
    pub fn http_hooks(&self) -> &HttpHooks {
        &self.http_hooks
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    /// KV port of a running node.
    pub fn kv_port(&self, node: NodeId) -> Option<u16> {
        self.servers(node)?.kv.as_ref().map(KvServer::listen_port)
    }

    /// Management port of a running node.
    pub fn http_port(&self, node: NodeId) -> Option<u16> {
        self.servers(node)?.http.as_ref().map(HttpServer::listen_port)
    }

    pub fn is_running(&self) -> bool {
        !self.nodes.is_empty()
    }

    fn servers(&self, node: NodeId) -> Option<&NodeServers> {
        self.nodes.iter().find(|n| n.id == node)
    }

    /// Bind every node's listeners.
    ///
    /// If any listener fails to bind, the ones already started are closed.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            anyhow::bail!("runtime already started");
        }

        if let Err(e) = self.bind_nodes().await {
            if let Err(close_err) = self.stop().await {
                tracing::warn!(error = %close_err, "failed to close partially started cluster");
            }
            return Err(e);
        }

        tracing::info!(
            nodes = self.nodes.len(),
            revision = self.cluster.revision(),
            "cluster started"
        );
        Ok(())
    }

    async fn bind_nodes(&mut self) -> Result<()> {
        let config = Arc::clone(&self.config);
        let bind = config.listeners.bind_addr()?;

        for (index, (&id, node)) in self.node_ids.iter().zip(&config.nodes).enumerate() {
            let offset = index as u16;
            self.nodes.push(NodeServers {
                id,
                kv: None,
                http: None,
            });

            if node.services.contains(&ServiceType::Kv) {
                let port = config.listeners.kv_port_base.map_or(0, |p| p + offset);
                let options = KvServerOptions::new(id, self.cluster.clone(), self.kv_hooks.clone())
                    .with_bind(bind, port);
                let server = KvServer::bind(options)
                    .await
                    .with_context(|| format!("failed to start kv server for {}", id))?;
                let port = server.listen_port();
                if let Some(servers) = self.nodes.last_mut() {
                    servers.kv = Some(server);
                }
                self.cluster.set_service_port(id, ServiceType::Kv, port)?;
            }

            if node.services.contains(&ServiceType::Mgmt) {
                let port = config.listeners.http_port_base.map_or(0, |p| p + offset);
                let mut options = HttpServerOptions::new(
                    self.http_hooks.request_handler(id, self.cluster.clone()),
                )
                .with_service_name(format!("mgmt {}", id))
                .with_bind(bind, port);
                options.shutdown_grace = config.server.shutdown_grace();
                let server = HttpServer::bind(options)
                    .await
                    .with_context(|| format!("failed to start mgmt server for {}", id))?;
                let port = server.listen_port();
                if let Some(servers) = self.nodes.last_mut() {
                    servers.http = Some(server);
                }
                self.cluster.set_service_port(id, ServiceType::Mgmt, port)?;
            }
        }
        Ok(())
    }

    /// Start, then serve until Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        } else {
            tracing::warn!("shutdown signal received (SIGINT)");
        }

        self.stop().await
    }

    /// Close every listener.
    pub async fn stop(&mut self) -> Result<()> {
        for mut servers in self.nodes.drain(..) {
            if let Some(mut kv) = servers.kv.take() {
                kv.close()
                    .await
                    .with_context(|| format!("failed to close kv server for {}", servers.id))?;
            }
            if let Some(mut http) = servers.http.take() {
                http.close()
                    .await
                    .with_context(|| format!("failed to close mgmt server for {}", servers.id))?;
            }
        }

        tracing::info!("cluster stopped");
        Ok(())
    }
}
