//! Configuration loading and runtime assembly.

mod common;

use bytes::{BufMut, BytesMut};
use cavern::core::config::Config;
use cavern::core::runtime::Runtime;
use cavern::memd::{Command, HelloFeature, Packet, Status, DATATYPE_JSON};
use cavern::topology::{Network, ServiceType};
use common::{create_config_file, create_minimal_config, http_base, kv_addr, TestClient};

// ============================================================================
// Config files
// ============================================================================

#[test]
fn minimal_config_file_loads_defaults() {
    let file = create_minimal_config();
    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.nodes.len(), 3);
    assert_eq!(config.buckets[0].name, "default");
    assert_eq!(config.listeners.bind, "127.0.0.1");
    assert_eq!(config.telemetry.log_level, "info");
}

#[test]
fn full_config_file_loads() {
    let file = create_config_file(
        r#"
[listeners]
bind = "127.0.0.1"

[server]
shutdown_grace_ms = 250

[auth]
username = "tester"
password = "secret"

[telemetry]
log_level = "debug"

[[nodes]]
hostname = "10.0.0.1"
services = ["kv", "mgmt", "views"]

[[nodes]]
hostname = "10.0.0.2"
services = ["kv", "mgmt"]
network = "external"

[nodes.alternate_addresses.external]
hostname = "node2.example.com"
ports = { kv = 31210, mgmt = 38091 }

[[buckets]]
name = "beer-sample"
replicas = 2
vbuckets = 32
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.nodes.len(), 2);
    assert_eq!(config.auth.username, "tester");
    assert_eq!(config.server.shutdown_grace_ms, 250);
    assert_eq!(config.buckets[0].vbuckets, 32);

    let runtime = Runtime::new(config).unwrap();
    let state = runtime.cluster().snapshot();
    let second = &state.nodes()[1];
    assert_eq!(second.network, Network::Alternate("external".to_string()));
    assert_eq!(
        second.alternate_addresses["external"].port(ServiceType::Kv),
        Some(31210)
    );
    let bucket = state.bucket("beer-sample").unwrap();
    assert_eq!(bucket.num_vbuckets(), 32);
    assert_eq!(bucket.vbucket_map[0].len(), 3);
}

#[test]
fn invalid_config_is_rejected() {
    let file = create_config_file(
        r#"
[telemetry]
log_level = "loud"
"#,
    );
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("log_level"));

    let file = create_config_file("[listeners]\nbind = \"not-an-ip\"\n");
    assert!(Config::from_file(file.path()).is_err());

    let file = create_config_file("[[nodes]\n");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn missing_config_file_is_error() {
    let err = Config::from_file(std::path::Path::new("/nonexistent/cavern.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

// ============================================================================
// Runtime
// ============================================================================

#[tokio::test]
async fn sdk_bootstrap_sequence() {
    let config = Config::from_toml(
        r#"
[auth]
username = "Administrator"
password = "password"

[[buckets]]
name = "default"
"#,
    )
    .unwrap();
    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();
    let node = runtime.node_ids()[0];

    let mut client = TestClient::connect(kv_addr(&runtime, node)).await;

    let mut features = BytesMut::new();
    features.put_u16(HelloFeature::Xerror as u16);
    features.put_u16(HelloFeature::Json as u16);
    let res = client
        .call(
            Packet::request(Command::Hello)
                .with_key("cavern-test")
                .with_value(features.freeze()),
        )
        .await;
    assert_eq!(res.status, Status::Success);
    assert_eq!(res.value.len(), 4);

    let res = client.call(Packet::request(Command::SaslListMechs)).await;
    assert_eq!(&res.value[..], b"PLAIN");

    let res = client
        .call(
            Packet::request(Command::SaslAuth)
                .with_key("PLAIN")
                .with_value(&b"\0Administrator\0password"[..]),
        )
        .await;
    assert_eq!(res.status, Status::Success);

    let res = client
        .call(Packet::request(Command::SelectBucket).with_key("nope"))
        .await;
    assert_eq!(res.status, Status::KeyNotFound);

    client.select_bucket("default").await;

    let res = client.call(Packet::request(Command::GetClusterConfig)).await;
    assert_eq!(res.status, Status::Success);
    assert_eq!(res.datatype, DATATYPE_JSON);
    let doc: serde_json::Value = serde_json::from_slice(&res.value).unwrap();
    assert_eq!(doc["name"], "default");

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn wrong_password_is_auth_error() {
    let mut runtime = Runtime::new(Config::default()).unwrap();
    runtime.start().await.unwrap();
    let node = runtime.node_ids()[0];

    let mut client = TestClient::connect(kv_addr(&runtime, node)).await;
    let res = client
        .call(
            Packet::request(Command::SaslAuth)
                .with_key("PLAIN")
                .with_value(&b"\0Administrator\0nope"[..]),
        )
        .await;
    assert_eq!(res.status, Status::AuthError);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn http_override_shadows_default_route() {
    let mut runtime = Runtime::new(Config::default()).unwrap();
    runtime.start().await.unwrap();
    let node = runtime.node_ids()[1];

    runtime
        .http_hooks()
        .overrides()
        .expect()
        .method("GET")
        .path("/pools/default/b/{bucket}")
        .once()
        .handler(|ctx, _req, _next| {
            let bucket = ctx.param("bucket")?.to_string();
            Some(cavern::servers::HttpResponse::new(503).with_body(bucket))
        })
        .unwrap();

    let url = format!("{}/pools/default/b/default", http_base(&runtime, node));
    let first = reqwest::get(&url).await.unwrap();
    assert_eq!(first.status().as_u16(), 503);
    assert_eq!(first.text().await.unwrap(), "default");

    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(second.status().as_u16(), 200);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn stop_releases_every_port() {
    let mut runtime = Runtime::new(Config::default()).unwrap();
    runtime.start().await.unwrap();
    let addrs: Vec<_> = runtime
        .node_ids()
        .iter()
        .map(|&id| kv_addr(&runtime, id))
        .collect();

    assert!(runtime.start().await.is_err());
    runtime.stop().await.unwrap();

    for addr in addrs {
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
