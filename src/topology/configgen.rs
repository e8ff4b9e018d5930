//! Cluster and terse bucket configuration documents.
//!
//! Every document is rendered from one [`ClusterState`] snapshot, from the
//! point of view of the node the client is connected to. That node's
//! advertised [`Network`] picks which address of every other node appears.
//! A node with no address on that network keeps its slot in each list, with
//! its address fields left out.

use super::{Bucket, ClusterState, Network, NetworkAddress, Node, NodeId, ServiceType};
use crate::core::error::{CavernError, CavernResult};
use serde::Serialize;
use std::collections::BTreeMap;

const CLUSTER_CAPABILITIES_VER: [u32; 2] = [1, 0];

#[derive(Serialize)]
struct NodeExt<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    services: Option<BTreeMap<&'static str, u16>>,
    #[serde(rename = "thisNode", skip_serializing_if = "is_false")]
    this_node: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<&'a str>,
}

#[derive(Serialize)]
struct LegacyNode {
    #[serde(rename = "couchApiBase", skip_serializing_if = "Option::is_none")]
    couch_api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ports: Option<LegacyPorts>,
}

#[derive(Serialize)]
struct LegacyPorts {
    direct: u16,
}

#[derive(Serialize)]
struct ClusterConfig<'a> {
    rev: u64,
    #[serde(rename = "nodesExt")]
    nodes_ext: Vec<NodeExt<'a>>,
    #[serde(rename = "clusterCapabilitiesVer")]
    cluster_capabilities_ver: [u32; 2],
    #[serde(rename = "clusterCapabilities")]
    cluster_capabilities: &'a BTreeMap<String, Vec<String>>,
}

#[derive(Serialize)]
struct VbucketServerMap {
    #[serde(rename = "hashAlgorithm")]
    hash_algorithm: &'static str,
    #[serde(rename = "numReplicas")]
    num_replicas: u32,
    #[serde(rename = "serverList")]
    server_list: Vec<Option<String>>,
    #[serde(rename = "vBucketMap")]
    vbucket_map: Vec<Vec<i32>>,
}

#[derive(Serialize)]
struct Ddocs {
    uri: String,
}

#[derive(Serialize)]
struct TerseBucketConfig<'a> {
    rev: u64,
    name: &'a str,
    uri: String,
    #[serde(rename = "streamingUri")]
    streaming_uri: String,
    nodes: Vec<LegacyNode>,
    #[serde(rename = "nodesExt")]
    nodes_ext: Vec<NodeExt<'a>>,
    #[serde(rename = "nodeLocator")]
    node_locator: &'static str,
    uuid: &'a str,
    ddocs: Ddocs,
    #[serde(rename = "bucketCapabilitiesVer")]
    bucket_capabilities_ver: &'static str,
    #[serde(rename = "bucketCapabilities")]
    bucket_capabilities: Vec<&'static str>,
    #[serde(rename = "vBucketServerMap")]
    vbucket_server_map: VbucketServerMap,
    #[serde(rename = "clusterCapabilitiesVer")]
    cluster_capabilities_ver: [u32; 2],
    #[serde(rename = "clusterCapabilities")]
    cluster_capabilities: &'a BTreeMap<String, Vec<String>>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Render the cluster-wide config seen from `requester`.
pub fn cluster_config(state: &ClusterState, requester: NodeId) -> CavernResult<Vec<u8>> {
    let network = requesting_network(state, requester)?;

    let doc = ClusterConfig {
        rev: state.revision(),
        nodes_ext: nodes_ext(state, requester, network),
        cluster_capabilities_ver: CLUSTER_CAPABILITIES_VER,
        cluster_capabilities: state.capabilities(),
    };

    Ok(serde_json::to_vec(&doc)?)
}

/// Render the terse config of `bucket` seen from `requester`.
pub fn terse_bucket_config(
    state: &ClusterState,
    bucket: &str,
    requester: NodeId,
) -> CavernResult<Vec<u8>> {
    let network = requesting_network(state, requester)?;
    let bucket = state
        .bucket(bucket)
        .ok_or_else(|| CavernError::bucket_not_found(bucket))?;

    let kv_nodes: Vec<&Node> = state
        .nodes()
        .iter()
        .filter(|n| n.has_service(ServiceType::Kv))
        .collect();

    let doc = TerseBucketConfig {
        rev: state.revision(),
        name: &bucket.name,
        uri: format!(
            "/pools/default/buckets/{}?bucket_uuid={}",
            bucket.name, bucket.uuid
        ),
        streaming_uri: format!(
            "/pools/default/bucketsStreaming/{}?bucket_uuid={}",
            bucket.name, bucket.uuid
        ),
        nodes: kv_nodes
            .iter()
            .map(|node| legacy_node(node, bucket, network))
            .collect(),
        nodes_ext: nodes_ext(state, requester, network),
        node_locator: "vbucket",
        uuid: &bucket.uuid,
        ddocs: Ddocs {
            uri: format!("/pools/default/buckets/{}/ddocs", bucket.name),
        },
        bucket_capabilities_ver: "",
        bucket_capabilities: bucket
            .capabilities
            .iter()
            .map(|c| c.config_name())
            .collect(),
        vbucket_server_map: vbucket_server_map(bucket, &kv_nodes, network)?,
        cluster_capabilities_ver: CLUSTER_CAPABILITIES_VER,
        cluster_capabilities: state.capabilities(),
    };

    Ok(serde_json::to_vec(&doc)?)
}

fn requesting_network(state: &ClusterState, requester: NodeId) -> CavernResult<&Network> {
    state
        .node(requester)
        .map(|n| &n.network)
        .ok_or(CavernError::UnknownNode { node_id: requester })
}

fn nodes_ext<'a>(
    state: &'a ClusterState,
    requester: NodeId,
    network: &Network,
) -> Vec<NodeExt<'a>> {
    state
        .nodes()
        .iter()
        .map(|node| {
            let address = node.address_for(network);
            NodeExt {
                services: address.map(|a| service_ports(node, a)),
                this_node: node.id == requester,
                hostname: address.map(|a| a.hostname.as_str()),
            }
        })
        .collect()
}

fn service_ports(node: &Node, address: &NetworkAddress) -> BTreeMap<&'static str, u16> {
    address
        .ports
        .iter()
        .filter(|(service, _)| node.has_service(**service))
        .map(|(service, port)| (service.config_key(), *port))
        .collect()
}

fn legacy_node(node: &Node, bucket: &Bucket, network: &Network) -> LegacyNode {
    let Some(address) = node.address_for(network) else {
        return LegacyNode {
            couch_api_base: None,
            hostname: None,
            ports: None,
        };
    };

    LegacyNode {
        couch_api_base: address.port(ServiceType::Views).map(|port| {
            format!(
                "http://{}/{}%2B{}",
                host_port(&address.hostname, port),
                bucket.name,
                bucket.uuid
            )
        }),
        hostname: address
            .port(ServiceType::Mgmt)
            .map(|port| host_port(&address.hostname, port)),
        ports: address
            .port(ServiceType::Kv)
            .map(|direct| LegacyPorts { direct }),
    }
}

fn vbucket_server_map(
    bucket: &Bucket,
    kv_nodes: &[&Node],
    network: &Network,
) -> CavernResult<VbucketServerMap> {
    let server_list = kv_nodes
        .iter()
        .map(|node| {
            node.address_for(network).and_then(|address| {
                address
                    .port(ServiceType::Kv)
                    .map(|port| host_port(&address.hostname, port))
            })
        })
        .collect();

    let index: BTreeMap<NodeId, i32> = kv_nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id, i as i32))
        .collect();

    let vbucket_map = bucket
        .vbucket_map
        .iter()
        .enumerate()
        .map(|(vb, chain)| {
            chain
                .iter()
                .map(|slot| match slot {
                    None => Ok(-1),
                    Some(id) => index.get(id).copied().ok_or_else(|| {
                        CavernError::invalid_topology(format!(
                            "bucket {} vbucket {} references {} which is not a kv node",
                            bucket.name, vb, id
                        ))
                    }),
                })
                .collect::<CavernResult<Vec<i32>>>()
        })
        .collect::<CavernResult<Vec<_>>>()?;

    Ok(VbucketServerMap {
        hash_algorithm: "CRC",
        num_replicas: bucket.num_replicas,
        server_list,
        vbucket_map,
    })
}

fn host_port(hostname: &str, port: u16) -> String {
    if hostname.contains(':') {
        format!("[{}]:{}", hostname, port)
    } else {
        format!("{}:{}", hostname, port)
    }
}
