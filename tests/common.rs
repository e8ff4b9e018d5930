//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use bytes::BytesMut;
use cavern::core::config::Config;
use cavern::core::runtime::Runtime;
use cavern::memd::{codec, Command, DecodeResult, Packet};
use cavern::topology::NodeId;
use std::io::Write;
use std::net::SocketAddr;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Create a configuration file from TOML text.
pub fn create_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    create_config_file("")
}

/// A configuration with `nodes` kv+mgmt nodes and the given buckets.
pub fn cluster_config(nodes: usize, buckets: &[&str]) -> Config {
    let mut content = String::new();
    for _ in 0..nodes {
        content.push_str("[[nodes]]\nservices = [\"kv\", \"mgmt\"]\n\n");
    }
    for bucket in buckets {
        content.push_str(&format!("[[buckets]]\nname = \"{}\"\n\n", bucket));
    }
    Config::from_toml(&content).expect("valid test config")
}

/// Start a runtime on ephemeral ports.
pub async fn start_runtime(config: Config) -> Runtime {
    let mut runtime = Runtime::new(config).expect("runtime");
    runtime.start().await.expect("runtime start");
    runtime
}

/// Address of a node's KV listener.
pub fn kv_addr(runtime: &Runtime, node: NodeId) -> SocketAddr {
    let port = runtime.kv_port(node).expect("node runs kv");
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Base URL of a node's management listener.
pub fn http_base(runtime: &Runtime, node: NodeId) -> String {
    let port = runtime.http_port(node).expect("node runs mgmt");
    format!("http://127.0.0.1:{}", port)
}

/// Minimal binary protocol client.
pub struct TestClient {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            stream,
            read_buf: BytesMut::new(),
        }
    }

    /// Send a request without waiting for the reply.
    pub async fn send(&mut self, packet: &Packet) {
        let mut buf = BytesMut::new();
        codec::encode(packet, &mut buf);
        self.stream.write_all(&buf).await.expect("write");
    }

    /// Send raw bytes.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write");
    }

    /// Read the next frame; `None` once the server closes the connection.
    pub async fn recv(&mut self) -> Option<Packet> {
        loop {
            match codec::decode(&self.read_buf) {
                DecodeResult::Complete(packet, consumed) => {
                    let _ = self.read_buf.split_to(consumed);
                    return Some(packet);
                }
                DecodeResult::Incomplete => {}
                other => panic!("unexpected frame from server: {:?}", other),
            }
            let read = self.stream.read_buf(&mut self.read_buf).await.ok()?;
            if read == 0 {
                return None;
            }
        }
    }

    /// Send a request and wait for its reply.
    pub async fn call(&mut self, packet: Packet) -> Packet {
        self.send(&packet).await;
        self.recv().await.expect("response")
    }

    /// SELECT_BUCKET then expect success.
    pub async fn select_bucket(&mut self, bucket: &str) {
        let res = self
            .call(Packet::request(Command::SelectBucket).with_key(bucket.to_string()))
            .await;
        assert_eq!(res.status, cavern::memd::Status::Success);
    }

    /// Read one bare 24-byte response header, for opcodes the codec does not model.
    pub async fn recv_header(&mut self) -> [u8; 24] {
        let mut header = [0u8; 24];
        let buffered = self.read_buf.len().min(24);
        header[..buffered].copy_from_slice(&self.read_buf.split_to(buffered));
        self.stream
            .read_exact(&mut header[buffered..])
            .await
            .expect("read header");
        header
    }
}
