//! Cluster aggregate and its snapshot-swapped handle.
//!
//! Readers call [`ClusterHandle::snapshot`] and get an immutable
//! [`ClusterState`]. Writers go through [`ClusterHandle::update`], which
//! serializes mutations, bumps the revision, and publishes a new snapshot.

use super::{Bucket, BucketCapability, Network, NetworkAddress, Node, NodeId, ServiceType};
use crate::core::error::{CavernError, CavernResult};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Immutable view of the cluster at one revision.
#[derive(Debug, Clone)]
pub struct ClusterState {
    revision: u64,
    next_node_id: u32,
    nodes: Vec<Node>,
    buckets: BTreeMap<String, Bucket>,
    capabilities: BTreeMap<String, Vec<String>>,
}

impl Default for ClusterState {
    fn default() -> Self {
        let mut capabilities = BTreeMap::new();
        capabilities.insert(
            "n1ql".to_string(),
            vec![
                "enhancedPreparedStatements".to_string(),
                "costBasedOptimizer".to_string(),
            ],
        );
        Self {
            revision: 1,
            next_node_id: 0,
            nodes: Vec::new(),
            buckets: BTreeMap::new(),
            capabilities,
        }
    }
}

impl ClusterState {
    /// Revision of this snapshot.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Nodes in cluster order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Position of a node in [`ClusterState::nodes`].
    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Look up a bucket.
    pub fn bucket(&self, name: &str) -> Option<&Bucket> {
        self.buckets.get(name)
    }

    /// Buckets by name.
    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    /// Cluster-level capabilities, by service.
    pub fn capabilities(&self) -> &BTreeMap<String, Vec<String>> {
        &self.capabilities
    }

    /// Ids of nodes running the KV service, in cluster order.
    pub fn kv_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.has_service(ServiceType::Kv))
            .map(|n| n.id)
            .collect()
    }

    fn node_mut(&mut self, id: NodeId) -> CavernResult<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(CavernError::UnknownNode { node_id: id })
    }

    fn rebalance(&mut self) {
        let kv_nodes = self.kv_nodes();
        for bucket in self.buckets.values_mut() {
            bucket.rebalance(&kv_nodes);
        }
    }
}

/// Options for creating a bucket.
#[derive(Debug, Clone)]
pub struct BucketSpec {
    pub name: String,
    pub num_replicas: u32,
    pub num_vbuckets: u16,
    pub capabilities: Option<BTreeSet<BucketCapability>>,
}

impl BucketSpec {
    /// A bucket with one replica and default vbucket count.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_replicas: 1,
            num_vbuckets: super::bucket::DEFAULT_NUM_VBUCKETS,
            capabilities: None,
        }
    }

    /// Set the replica count.
    pub fn with_replicas(mut self, num_replicas: u32) -> Self {
        self.num_replicas = num_replicas;
        self
    }

    /// Set the vbucket count.
    pub fn with_vbuckets(mut self, num_vbuckets: u16) -> Self {
        self.num_vbuckets = num_vbuckets;
        self
    }
}

struct Inner {
    current: ArcSwap<ClusterState>,
    writer: Mutex<()>,
}

/// Shared handle to the cluster topology.
#[derive(Clone)]
pub struct ClusterHandle {
    inner: Arc<Inner>,
}

impl Default for ClusterHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("revision", &self.revision())
            .finish()
    }
}

impl ClusterHandle {
    /// Create an empty cluster at revision 1.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                current: ArcSwap::from_pointee(ClusterState::default()),
                writer: Mutex::new(()),
            }),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ClusterState> {
        self.inner.current.load_full()
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        self.inner.current.load().revision
    }

    /// Apply a mutation and publish it under a new revision.
    ///
    /// If `f` fails nothing is published and the revision is unchanged.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut ClusterState) -> CavernResult<T>,
    ) -> CavernResult<T> {
        let _guard = self.inner.writer.lock();
        let mut next = ClusterState::clone(&self.inner.current.load());
        let out = f(&mut next)?;
        next.revision += 1;
        let revision = next.revision;
        self.inner.current.store(Arc::new(next));
        tracing::debug!(revision, "published cluster topology");
        Ok(out)
    }

    /// Add a node and rebalance every bucket.
    pub fn add_node(
        &self,
        hostname: impl Into<String>,
        services: &[ServiceType],
    ) -> CavernResult<NodeId> {
        let hostname = hostname.into();
        self.update(|state| {
            let id = NodeId(state.next_node_id);
            state.next_node_id += 1;
            state.nodes.push(Node::new(id, hostname, services));
            state.rebalance();
            Ok(id)
        })
    }

    /// Remove a node and rebalance every bucket.
    pub fn remove_node(&self, id: NodeId) -> CavernResult<()> {
        self.update(|state| {
            let index = state
                .node_index(id)
                .ok_or(CavernError::UnknownNode { node_id: id })?;
            state.nodes.remove(index);
            state.rebalance();
            Ok(())
        })
    }

    /// Set the port a service listens on for a node's default address.
    pub fn set_service_port(
        &self,
        id: NodeId,
        service: ServiceType,
        port: u16,
    ) -> CavernResult<()> {
        self.update(|state| {
            state.node_mut(id)?.default_address.ports.insert(service, port);
            Ok(())
        })
    }

    /// Install or replace a named alternate address for a node.
    pub fn set_alternate_address(
        &self,
        id: NodeId,
        network: impl Into<String>,
        address: NetworkAddress,
    ) -> CavernResult<()> {
        let network = network.into();
        self.update(|state| {
            state
                .node_mut(id)?
                .alternate_addresses
                .insert(network, address);
            Ok(())
        })
    }

    /// Choose the address family a node advertises to its clients.
    pub fn set_node_network(&self, id: NodeId, network: Network) -> CavernResult<()> {
        self.update(|state| {
            state.node_mut(id)?.network = network;
            Ok(())
        })
    }

    /// Create a bucket laid out over the current KV nodes.
    pub fn add_bucket(&self, spec: BucketSpec) -> CavernResult<()> {
        self.update(|state| {
            if state.buckets.contains_key(&spec.name) {
                return Err(CavernError::BucketExists { bucket: spec.name });
            }
            let mut bucket = Bucket::new(
                spec.name.clone(),
                spec.num_replicas,
                spec.num_vbuckets,
                &state.kv_nodes(),
            );
            if let Some(capabilities) = spec.capabilities {
                bucket.capabilities = capabilities;
            }
            state.buckets.insert(spec.name, bucket);
            Ok(())
        })
    }

    /// Delete a bucket.
    pub fn remove_bucket(&self, name: &str) -> CavernResult<()> {
        self.update(|state| {
            state
                .buckets
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| CavernError::bucket_not_found(name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cluster_revision() {
        let cluster = ClusterHandle::new();
        assert_eq!(cluster.revision(), 1);
        assert!(cluster.snapshot().nodes().is_empty());
    }

    #[test]
    fn test_add_node_bumps_revision() {
        let cluster = ClusterHandle::new();
        let a = cluster.add_node("10.0.0.1", &[ServiceType::Kv]).unwrap();
        let b = cluster.add_node("10.0.0.2", &[ServiceType::Kv]).unwrap();

        assert_eq!(a, NodeId(0));
        assert_eq!(b, NodeId(1));
        assert_eq!(cluster.revision(), 3);
    }

    #[test]
    fn test_failed_update_keeps_revision() {
        let cluster = ClusterHandle::new();
        let before = cluster.revision();

        let err = cluster.remove_node(NodeId(9)).unwrap_err();
        assert!(matches!(err, CavernError::UnknownNode { .. }));
        assert_eq!(cluster.revision(), before);
    }

    #[test]
    fn test_snapshot_is_isolated_from_updates() {
        let cluster = ClusterHandle::new();
        cluster.add_node("10.0.0.1", &[ServiceType::Kv]).unwrap();
        let old = cluster.snapshot();

        cluster.add_bucket(BucketSpec::new("default")).unwrap();

        assert!(old.bucket("default").is_none());
        assert!(cluster.snapshot().bucket("default").is_some());
        assert!(cluster.snapshot().revision() > old.revision());
    }

    #[test]
    fn test_duplicate_bucket_rejected() {
        let cluster = ClusterHandle::new();
        cluster.add_bucket(BucketSpec::new("default")).unwrap();
        let err = cluster.add_bucket(BucketSpec::new("default")).unwrap_err();
        assert!(matches!(err, CavernError::BucketExists { .. }));
    }

    #[test]
    fn test_remove_node_rebalances() {
        let cluster = ClusterHandle::new();
        for host in ["a", "b", "c"] {
            cluster.add_node(host, &[ServiceType::Kv]).unwrap();
        }
        cluster
            .add_bucket(BucketSpec::new("default").with_vbuckets(8))
            .unwrap();

        cluster.remove_node(NodeId(1)).unwrap();

        let state = cluster.snapshot();
        let bucket = state.bucket("default").unwrap();
        for chain in &bucket.vbucket_map {
            assert!(!chain.contains(&Some(NodeId(1))));
            assert!(chain[0].is_some());
        }
    }

    #[test]
    fn test_kv_nodes_skip_non_kv() {
        let cluster = ClusterHandle::new();
        cluster.add_node("a", &[ServiceType::Kv]).unwrap();
        cluster.add_node("b", &[ServiceType::Query]).unwrap();

        assert_eq!(cluster.snapshot().kv_nodes(), vec![NodeId(0)]);
    }
}
