//! GET_CLUSTER_CONFIG over the binary protocol.

use crate::core::error::{CavernError, CavernResult};
use crate::hooks::{KvContext, KvHookManager, Next};
use crate::memd::{Command, HelloFeature, Magic, Packet, Status, DATATYPE_JSON};
use crate::topology::{cluster_config, terse_bucket_config};

pub(super) fn register(hooks: &KvHookManager) -> CavernResult<()> {
    hooks
        .expect()
        .magic(Magic::Req)
        .cmd(Command::GetClusterConfig)
        .handler(handle_get_cluster_config)?;
    Ok(())
}

/// Answer with the config of the selected bucket, or the cluster config when
/// no bucket is selected.
fn handle_get_cluster_config(
    ctx: &mut KvContext<'_>,
    pkt: &Packet,
    _next: Next<'_>,
) -> CavernResult<()> {
    let state = ctx.cluster().snapshot();
    let node = ctx.client.node();

    let config = match ctx.client.selected_bucket() {
        Some(bucket) => terse_bucket_config(&state, bucket, node),
        None => cluster_config(&state, node),
    };

    let config = match config {
        Ok(config) => config,
        Err(e @ CavernError::BucketNotFound { .. }) => {
            tracing::debug!(conn = %ctx.client.id(), error = %e, "selected bucket is gone");
            return ctx.write_packet(Packet::response_to(pkt).with_status(Status::NoBucket));
        }
        Err(e) => {
            tracing::warn!(conn = %ctx.client.id(), error = %e, "config generation failed");
            return ctx.write_packet(Packet::response_to(pkt).with_status(e.status()));
        }
    };

    let mut response = Packet::response_to(pkt).with_value(config);
    if ctx.client.has_feature(HelloFeature::Json) {
        response = response.with_datatype(DATATYPE_JSON);
    }
    ctx.write_packet(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{KvClient, KvHooks};
    use crate::servers::ConnectionId;
    use crate::topology::{BucketSpec, ClusterHandle, NodeId, ServiceType};
    use std::collections::BTreeSet;

    fn fixture() -> (KvHooks, ClusterHandle, NodeId) {
        let hooks = KvHooks::new();
        register(hooks.defaults()).unwrap();

        let cluster = ClusterHandle::new();
        let node = cluster
            .add_node("127.0.0.1", &[ServiceType::Kv, ServiceType::Mgmt])
            .unwrap();
        cluster.set_service_port(node, ServiceType::Kv, 11210).unwrap();
        cluster.set_service_port(node, ServiceType::Mgmt, 8091).unwrap();
        cluster.add_bucket(BucketSpec::new("default")).unwrap();
        (hooks, cluster, node)
    }

    fn request(hooks: &KvHooks, cluster: &ClusterHandle, client: &mut KvClient) -> Packet {
        let mut ctx = KvContext::new(client, cluster);
        let pkt = Packet::request(Command::GetClusterConfig).with_opaque(7);
        assert!(hooks.dispatch(&mut ctx, &pkt).unwrap());
        ctx.take_response().unwrap()
    }

    #[test]
    fn test_cluster_config_without_bucket() {
        let (hooks, cluster, node) = fixture();
        let mut client = KvClient::new(ConnectionId(1), node, None);

        let res = request(&hooks, &cluster, &mut client);

        assert_eq!(res.status, Status::Success);
        assert_eq!(res.opaque, 7);
        assert_eq!(res.datatype, 0);
        let doc: serde_json::Value = serde_json::from_slice(&res.value).unwrap();
        assert_eq!(doc["rev"], cluster.revision());
        assert!(doc.get("vBucketServerMap").is_none());
    }

    #[test]
    fn test_bucket_config_with_json_datatype() {
        let (hooks, cluster, node) = fixture();
        let mut client = KvClient::new(ConnectionId(1), node, None);
        client.select_bucket("default");
        client.set_features(BTreeSet::from([HelloFeature::Json]));

        let res = request(&hooks, &cluster, &mut client);

        assert_eq!(res.datatype, DATATYPE_JSON);
        let doc: serde_json::Value = serde_json::from_slice(&res.value).unwrap();
        assert_eq!(doc["name"], "default");
        assert_eq!(doc["vBucketServerMap"]["serverList"][0], "127.0.0.1:11210");
    }

    #[test]
    fn test_deleted_bucket_is_no_bucket() {
        let (hooks, cluster, node) = fixture();
        let mut client = KvClient::new(ConnectionId(1), node, None);
        client.select_bucket("default");
        cluster.remove_bucket("default").unwrap();

        let res = request(&hooks, &cluster, &mut client);
        assert_eq!(res.status, Status::NoBucket);
        assert!(res.value.is_empty());
    }
}
