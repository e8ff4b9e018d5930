//! Configuration parsing and validation.
//!
//! Cavern configuration is loaded from TOML files with CLI overrides. Every
//! field has a default, so an empty file describes a three node cluster with
//! a single `default` bucket.

use crate::topology::{BucketCapability, BucketSpec, NetworkAddress, ServiceType};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level Cavern configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where node servers listen.
    #[serde(default)]
    pub listeners: ListenerConfig,

    /// Server lifecycle settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Login accepted by SASL PLAIN.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Cluster nodes, in node id order.
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeConfig>,

    /// Buckets created at startup.
    #[serde(default = "default_buckets")]
    pub buckets: Vec<BucketConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listeners: ListenerConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            telemetry: TelemetryConfig::default(),
            nodes: default_nodes(),
            buckets: default_buckets(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address every node server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// KV port of the first node; node `i` uses `kv_port_base + i`.
    /// Ephemeral ports when unset.
    #[serde(default)]
    pub kv_port_base: Option<u16>,

    /// Management port of the first node, numbered like `kv_port_base`.
    #[serde(default)]
    pub http_port_base: Option<u16>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            kv_port_base: None,
            http_port_base: None,
        }
    }
}

impl ListenerConfig {
    /// Parsed bind address.
    pub fn bind_addr(&self) -> Result<IpAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid listeners.bind address: {}", self.bind))
    }
}

/// Server lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// How long HTTP servers wait for in-flight requests on close.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// SASL credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// One cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hostname advertised on the default network.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Services the node runs.
    #[serde(default = "default_services")]
    pub services: Vec<ServiceType>,

    /// Network the node's clients are told to use.
    #[serde(default = "default_network")]
    pub network: String,

    /// Alternate addresses keyed by network name.
    #[serde(default)]
    pub alternate_addresses: BTreeMap<String, AlternateAddressConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            services: default_services(),
            network: default_network(),
            alternate_addresses: BTreeMap::new(),
        }
    }
}

/// An alternate hostname and its port mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternateAddressConfig {
    pub hostname: String,

    /// Ports keyed by service name.
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
}

impl AlternateAddressConfig {
    /// Topology address for this entry.
    pub fn to_address(&self) -> Result<NetworkAddress> {
        let mut address = NetworkAddress::new(self.hostname.clone());
        for (name, port) in &self.ports {
            let service = ServiceType::from_name(name)
                .with_context(|| format!("unknown service in alternate ports: {}", name))?;
            address = address.with_port(service, *port);
        }
        Ok(address)
    }
}

/// A bucket created at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default = "default_vbuckets")]
    pub vbuckets: u16,

    /// Advertised capabilities; the full default set when unset.
    #[serde(default)]
    pub capabilities: Option<BTreeSet<BucketCapability>>,
}

impl BucketConfig {
    /// Topology request for this bucket.
    pub fn to_spec(&self) -> BucketSpec {
        let mut spec = BucketSpec::new(self.name.clone())
            .with_replicas(self.replicas)
            .with_vbuckets(self.vbuckets);
        spec.capabilities = self.capabilities.clone();
        spec
    }
}

// Default value functions

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    1_000
}

fn default_username() -> String {
    "Administrator".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

fn default_services() -> Vec<ServiceType> {
    vec![ServiceType::Kv, ServiceType::Mgmt]
}

fn default_network() -> String {
    "default".to_string()
}

fn default_nodes() -> Vec<NodeConfig> {
    vec![NodeConfig::default(); 3]
}

fn default_buckets() -> Vec<BucketConfig> {
    vec![BucketConfig {
        name: "default".to_string(),
        replicas: default_replicas(),
        vbuckets: default_vbuckets(),
        capabilities: None,
    }]
}

fn default_replicas() -> u32 {
    1
}

fn default_vbuckets() -> u16 {
    crate::topology::bucket::DEFAULT_NUM_VBUCKETS
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref bind) = overrides.bind {
            self.listeners.bind = bind.clone();
        }
        if let Some(port) = overrides.kv_port_base {
            self.listeners.kv_port_base = Some(port);
        }
        if let Some(port) = overrides.http_port_base {
            self.listeners.http_port_base = Some(port);
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_listeners()?;
        self.validate_telemetry()?;
        self.validate_nodes()?;
        self.validate_buckets()?;
        Ok(())
    }

    fn validate_listeners(&self) -> Result<()> {
        self.listeners.bind_addr()?;

        let count = self.nodes.len() as u32;
        for (name, base) in [
            ("kv_port_base", self.listeners.kv_port_base),
            ("http_port_base", self.listeners.http_port_base),
        ] {
            if let Some(base) = base {
                if base == 0 {
                    anyhow::bail!("listeners.{} must be > 0", name);
                }
                if u32::from(base) + count > u32::from(u16::MAX) + 1 {
                    anyhow::bail!(
                        "listeners.{} ({}) leaves no room for {} nodes",
                        name,
                        base,
                        count
                    );
                }
            }
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    fn validate_nodes(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("at least one node is required");
        }
        if !self
            .nodes
            .iter()
            .any(|n| n.services.contains(&ServiceType::Kv))
        {
            anyhow::bail!("at least one node must run the kv service");
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if node.hostname.is_empty() {
                anyhow::bail!("nodes[{}].hostname must not be empty", i);
            }
            for alt in node.alternate_addresses.values() {
                alt.to_address()
                    .with_context(|| format!("invalid alternate address on nodes[{}]", i))?;
            }
            if node.network != "default" && !node.alternate_addresses.contains_key(&node.network)
            {
                anyhow::bail!(
                    "nodes[{}].network '{}' has no matching alternate address",
                    i,
                    node.network
                );
            }
        }
        Ok(())
    }

    fn validate_buckets(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for bucket in &self.buckets {
            if bucket.name.is_empty() {
                anyhow::bail!("bucket name must not be empty");
            }
            if !seen.insert(bucket.name.as_str()) {
                anyhow::bail!("duplicate bucket: {}", bucket.name);
            }
            if bucket.vbuckets == 0 {
                anyhow::bail!("buckets.{}.vbuckets must be > 0", bucket.name);
            }
            if bucket.replicas > 3 {
                anyhow::bail!(
                    "buckets.{}.replicas must be at most 3, got: {}",
                    bucket.name,
                    bucket.replicas
                );
            }
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override bind address.
    pub bind: Option<String>,
    /// Override first KV port.
    pub kv_port_base: Option<u16>,
    /// Override first management port.
    pub http_port_base: Option<u16>,
}
