//! Cluster nodes and their network addresses.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Services a node can run.
///
/// Variant order is the order services appear in generated configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Mgmt,
    Kv,
    Views,
    Query,
    Search,
    Analytics,
}

impl ServiceType {
    /// Parse a lowercase service name as written in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mgmt" => Some(ServiceType::Mgmt),
            "kv" => Some(ServiceType::Kv),
            "views" => Some(ServiceType::Views),
            "query" => Some(ServiceType::Query),
            "search" => Some(ServiceType::Search),
            "analytics" => Some(ServiceType::Analytics),
            _ => None,
        }
    }

    /// Key used for this service in the `services` map of a config.
    pub fn config_key(self) -> &'static str {
        match self {
            ServiceType::Mgmt => "mgmt",
            ServiceType::Kv => "kv",
            ServiceType::Views => "capi",
            ServiceType::Query => "n1ql",
            ServiceType::Search => "fts",
            ServiceType::Analytics => "cbas",
        }
    }
}

/// Which address family a node advertises to clients connecting to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Default,
    /// A named alternate address family such as `external`.
    Alternate(String),
}

impl Network {
    /// Parse a configured network name; `default` maps to [`Network::Default`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "" | "default" => Network::Default,
            other => Network::Alternate(other.to_string()),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Default => f.write_str("default"),
            Network::Alternate(name) => f.write_str(name),
        }
    }
}

/// A hostname plus per-service ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub hostname: String,
    pub ports: BTreeMap<ServiceType, u16>,
}

impl NetworkAddress {
    /// Create an address with no ports.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ports: BTreeMap::new(),
        }
    }

    /// Set a service port.
    pub fn with_port(mut self, service: ServiceType, port: u16) -> Self {
        self.ports.insert(service, port);
        self
    }

    /// Port for a service, if exposed on this address.
    pub fn port(&self, service: ServiceType) -> Option<u16> {
        self.ports.get(&service).copied()
    }
}

/// A member of the mock cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub services: BTreeSet<ServiceType>,
    pub network: Network,
    pub default_address: NetworkAddress,
    pub alternate_addresses: BTreeMap<String, NetworkAddress>,
}

impl Node {
    /// Create a node on `hostname` running `services`, with no ports yet.
    pub fn new(id: NodeId, hostname: impl Into<String>, services: &[ServiceType]) -> Self {
        Self {
            id,
            services: services.iter().copied().collect(),
            network: Network::Default,
            default_address: NetworkAddress::new(hostname),
            alternate_addresses: BTreeMap::new(),
        }
    }

    /// Whether this node runs `service`.
    pub fn has_service(&self, service: ServiceType) -> bool {
        self.services.contains(&service)
    }

    /// Address this node exposes on `network`.
    ///
    /// Never falls back to the default address for a named network.
    pub fn address_for(&self, network: &Network) -> Option<&NetworkAddress> {
        match network {
            Network::Default => Some(&self.default_address),
            Network::Alternate(name) => self.alternate_addresses.get(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(2).to_string(), "node-2");
    }

    #[test]
    fn test_service_from_name() {
        assert_eq!(ServiceType::from_name("kv"), Some(ServiceType::Kv));
        assert_eq!(ServiceType::from_name("query"), Some(ServiceType::Query));
        assert_eq!(ServiceType::from_name("n1ql"), None);
    }

    #[test]
    fn test_network_from_name() {
        assert_eq!(Network::from_name("default"), Network::Default);
        assert_eq!(
            Network::from_name("external"),
            Network::Alternate("external".to_string())
        );
    }

    #[test]
    fn test_address_for_no_fallback() {
        let mut node = Node::new(NodeId(0), "10.0.0.1", &[ServiceType::Kv]);
        node.default_address = NetworkAddress::new("10.0.0.1").with_port(ServiceType::Kv, 11210);

        let external = Network::Alternate("external".to_string());
        assert!(node.address_for(&external).is_none());
        assert_eq!(
            node.address_for(&Network::Default).map(|a| a.hostname.as_str()),
            Some("10.0.0.1")
        );

        node.alternate_addresses.insert(
            "external".to_string(),
            NetworkAddress::new("ext.example.com").with_port(ServiceType::Kv, 31210),
        );
        let addr = node.address_for(&external).unwrap();
        assert_eq!(addr.hostname, "ext.example.com");
        assert_eq!(addr.port(ServiceType::Kv), Some(31210));
    }

    #[test]
    fn test_service_config_keys() {
        assert_eq!(ServiceType::Views.config_key(), "capi");
        assert_eq!(ServiceType::Query.config_key(), "n1ql");
        assert!(ServiceType::Mgmt < ServiceType::Kv);
    }
}
