//! HTTP and KV listener lifecycle.

mod common;

use cavern::hooks::KvHooks;
use cavern::memd::{Command, Magic, Packet, Status};
use cavern::servers::{
    HttpRequest, HttpResponse, HttpServer, HttpServerOptions, KvServer, KvServerOptions,
    RequestHandler,
};
use cavern::topology::{ClusterHandle, NodeId};
use cavern::CavernError;
use common::TestClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

fn echo_handler() -> RequestHandler {
    Arc::new(|req: &HttpRequest| {
        if req.path == "/unhandled" {
            return None;
        }
        Some(
            HttpResponse::new(200)
                .with_header("x-method", req.method.clone())
                .with_body(format!("{} {}", req.method, req.path)),
        )
    })
}

fn sleepy_handler(delay: Duration) -> RequestHandler {
    Arc::new(move |_req: &HttpRequest| {
        std::thread::sleep(delay);
        Some(HttpResponse::new(200).with_body("done"))
    })
}

fn url(server: &HttpServer, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", server.listen_port(), path)
}

// ============================================================================
// HTTP server
// ============================================================================

#[tokio::test]
async fn http_dispatches_every_method_to_handler() {
    let mut server = HttpServer::bind(HttpServerOptions::new(echo_handler()))
        .await
        .unwrap();
    let client = reqwest::Client::new();

    let res = client
        .put(url(&server, "/anything/at/all"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.headers()["x-method"], "PUT");
    assert_eq!(res.text().await.unwrap(), "PUT /anything/at/all");

    server.close().await.unwrap();
}

#[tokio::test]
async fn http_repeated_headers_round_trip() {
    let handler: RequestHandler = Arc::new(|req: &HttpRequest| {
        let mut res = HttpResponse::new(200);
        for value in req.header_values("x-tag") {
            res = res.with_header("set-cookie", format!("tag={}", value));
        }
        Some(res)
    });
    let mut server = HttpServer::bind(HttpServerOptions::new(handler))
        .await
        .unwrap();

    let res = reqwest::Client::new()
        .get(url(&server, "/cookies"))
        .header("x-tag", "a")
        .header("x-tag", "b")
        .send()
        .await
        .unwrap();
    let cookies: Vec<_> = res
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, vec!["tag=a", "tag=b"]);

    server.close().await.unwrap();
}

#[tokio::test]
async fn http_none_response_is_501() {
    let mut server = HttpServer::bind(HttpServerOptions::new(echo_handler()))
        .await
        .unwrap();

    let res = reqwest::get(url(&server, "/unhandled")).await.unwrap();
    assert_eq!(res.status().as_u16(), 501);

    server.close().await.unwrap();
}

#[tokio::test]
async fn http_close_mid_request_then_refuses() {
    let mut server = HttpServer::bind(HttpServerOptions::new(sleepy_handler(
        Duration::from_millis(300),
    )))
    .await
    .unwrap();
    let addr = server.local_addr();

    let in_flight = tokio::spawn(reqwest::get(url(&server, "/slow")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.close().await.unwrap();
    assert!(!server.is_running());

    // The request started before close finishes within the grace period.
    let res = in_flight.await.unwrap().unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.text().await.unwrap(), "done");

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn http_close_is_bounded_by_grace() {
    let mut options = HttpServerOptions::new(sleepy_handler(Duration::from_secs(1)));
    options.shutdown_grace = Duration::from_millis(100);
    let mut server = HttpServer::bind(options).await.unwrap();
    let addr = server.local_addr();

    let in_flight = tokio::spawn(reqwest::get(url(&server, "/stuck")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    server.close().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(800));
    assert!(TcpStream::connect(addr).await.is_err());

    in_flight.abort();
}

#[tokio::test]
async fn http_restart_reuses_port() {
    let mut server = HttpServer::bind(
        HttpServerOptions::new(echo_handler()).with_service_name("restartable"),
    )
    .await
    .unwrap();
    let port = server.listen_port();
    assert_eq!(server.service_name(), "restartable");

    server.close().await.unwrap();
    assert!(matches!(
        server.close().await.unwrap_err(),
        CavernError::ServerClosed { .. }
    ));

    server.start().await.unwrap();
    assert_eq!(server.listen_port(), port);

    let res = reqwest::get(url(&server, "/again")).await.unwrap();
    assert_eq!(res.text().await.unwrap(), "GET /again");

    server.close().await.unwrap();
}

#[tokio::test]
async fn http_bind_conflict_is_reported() {
    let mut first = HttpServer::bind(HttpServerOptions::new(echo_handler()))
        .await
        .unwrap();
    let addr = first.local_addr();

    let err = HttpServer::bind(
        HttpServerOptions::new(echo_handler()).with_bind(addr.ip(), addr.port()),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, CavernError::Bind { .. }));

    first.close().await.unwrap();
}

// ============================================================================
// KV server
// ============================================================================

fn kv_options() -> KvServerOptions {
    let cluster = ClusterHandle::new();
    let hooks = KvHooks::new();
    hooks
        .defaults()
        .expect()
        .magic(Magic::Req)
        .cmd(Command::Noop)
        .handler(|ctx, pkt, _next| ctx.write_packet(Packet::response_to(pkt)))
        .unwrap();
    KvServerOptions::new(NodeId(0), cluster, hooks)
}

#[tokio::test]
async fn kv_close_drops_connections() {
    let mut server = KvServer::bind(kv_options()).await.unwrap();
    let addr = server.local_addr();

    let mut client = TestClient::connect(addr).await;
    let res = client.call(Packet::request(Command::Noop)).await;
    assert_eq!(res.status, Status::Success);
    assert_eq!(server.metrics().active_connections(), 1);

    server.close().await.unwrap();
    assert!(client.recv().await.is_none());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn kv_response_frame_closes_connection() {
    let server = KvServer::bind(kv_options()).await.unwrap();
    let mut client = TestClient::connect(server.local_addr()).await;

    let response = Packet::response_to(&Packet::request(Command::Noop));
    client.send(&response).await;
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn kv_malformed_frame_closes_connection() {
    let server = KvServer::bind(kv_options()).await.unwrap();
    let mut client = TestClient::connect(server.local_addr()).await;

    let mut frame = vec![0u8; 24];
    frame[0] = 0x42;
    client.send_raw(&frame).await;
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn kv_oversized_frame_closes_connection() {
    let server = KvServer::bind(kv_options()).await.unwrap();
    let mut client = TestClient::connect(server.local_addr()).await;

    let mut frame = vec![0u8; 24];
    frame[0] = Magic::Req as u8;
    frame[1] = Command::Set as u8;
    frame[8..12].copy_from_slice(&0xffff_fff0u32.to_be_bytes());
    client.send_raw(&frame).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("server kept buffering the frame");
    assert!(closed.is_none());
}

#[tokio::test]
async fn kv_restart_reuses_port() {
    let mut server = KvServer::bind(kv_options()).await.unwrap();
    let port = server.listen_port();

    server.close().await.unwrap();
    server.start().await.unwrap();
    assert_eq!(server.listen_port(), port);

    let mut client = TestClient::connect(server.local_addr()).await;
    let res = client.call(Packet::request(Command::Noop)).await;
    assert_eq!(res.status, Status::Success);

    server.close().await.unwrap();
}
