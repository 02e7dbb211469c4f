//! End-to-end tests: real server on a loopback port, tungstenite client.

use futures_util::{SinkExt, StreamExt};
use scopecast::config::{CliArgs, TomlConfig};
use scopecast::{frame, Config, PolicyKind, Server};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start(cli: CliArgs) -> (SocketAddr, CancellationToken) {
    let config = Config::merge(cli, TomlConfig::default()).unwrap();
    let server = Server::new(config);
    let shutdown = server.shutdown_token();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    (addr, shutdown)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

/// Next binary frame, or `None` once the stream ends or closes.
async fn next_frame(ws: &mut Client) -> Option<Vec<u8>> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for server");
        match msg {
            Some(Ok(Message::Binary(data))) => return Some(data.to_vec()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_demand_round_trip() {
    let (addr, _shutdown) = start(CliArgs {
        policy: Some(PolicyKind::Demand),
        ..Default::default()
    })
    .await;
    let mut ws = connect(addr).await;

    ws.send(Message::text("3")).await.unwrap();
    let data = next_frame(&mut ws).await.expect("frame");
    assert_eq!(data.len(), 60);
    let samples = frame::decode(&data).unwrap();
    assert_eq!(samples.len(), 15);
    assert!(samples.iter().all(|s| (0.0..50.0).contains(s)));

    ws.send(Message::text("1000")).await.unwrap();
    let data = next_frame(&mut ws).await.expect("frame");
    assert_eq!(data.len(), 1000 * 5 * 4);
}

#[tokio::test]
async fn test_demand_malformed_signal_closes_session() {
    let (addr, _shutdown) = start(CliArgs::default()).await;
    let mut ws = connect(addr).await;

    ws.send(Message::text("abc")).await.unwrap();
    assert!(next_frame(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_interval_pushes_without_requests() {
    let (addr, _shutdown) = start(CliArgs {
        policy: Some(PolicyKind::Interval),
        interval_ms: Some(20),
        default_groups: Some(10),
        ..Default::default()
    })
    .await;
    let mut ws = connect(addr).await;

    for _ in 0..3 {
        let data = next_frame(&mut ws).await.expect("frame");
        assert_eq!(data.len(), 10 * 5 * 4);
    }

    // Content is ignored; the stream keeps going
    ws.send(Message::text("not a number")).await.unwrap();
    assert!(next_frame(&mut ws).await.is_some());
}

#[tokio::test]
async fn test_adaptive_serves_default_until_requested() {
    let (addr, _shutdown) = start(CliArgs {
        policy: Some(PolicyKind::Adaptive),
        default_groups: Some(8),
        ..Default::default()
    })
    .await;
    let mut ws = connect(addr).await;

    ws.send(Message::text("ready")).await.unwrap();
    assert_eq!(next_frame(&mut ws).await.unwrap().len(), 8 * 5 * 4);

    ws.send(Message::text("4")).await.unwrap();
    assert_eq!(next_frame(&mut ws).await.unwrap().len(), 4 * 5 * 4);

    ws.send(Message::text("ready")).await.unwrap();
    assert_eq!(next_frame(&mut ws).await.unwrap().len(), 4 * 5 * 4);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (addr, _shutdown) = start(CliArgs::default()).await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    first.send(Message::text("1")).await.unwrap();
    second.send(Message::text("2")).await.unwrap();
    assert_eq!(next_frame(&mut second).await.unwrap().len(), 40);
    assert_eq!(next_frame(&mut first).await.unwrap().len(), 20);

    // A fault in one session leaves the other running
    first.send(Message::text("-1")).await.unwrap();
    assert!(next_frame(&mut first).await.is_none());
    second.send(Message::text("3")).await.unwrap();
    assert_eq!(next_frame(&mut second).await.unwrap().len(), 60);
}

#[tokio::test]
async fn test_connection_limit() {
    let (addr, _shutdown) = start(CliArgs {
        max_connections: Some(1),
        ..Default::default()
    })
    .await;
    let _held = connect(addr).await;

    match connect_async(format!("ws://{addr}/ws")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 503);
        }
        other => panic!("expected 503, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let (addr, shutdown) = start(CliArgs {
        policy: Some(PolicyKind::Interval),
        interval_ms: Some(10),
        default_groups: Some(1),
        ..Default::default()
    })
    .await;
    let mut ws = connect(addr).await;
    assert!(next_frame(&mut ws).await.is_some());

    shutdown.cancel();
    while next_frame(&mut ws).await.is_some() {}
}

#[tokio::test]
async fn test_page_and_health() {
    let (addr, _shutdown) = start(CliArgs {
        policy: Some(PolicyKind::Adaptive),
        ..Default::default()
    })
    .await;

    let health = http_get(addr, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));

    let page = http_get(addr, "/").await;
    assert!(page.starts_with("HTTP/1.1 200"));
    assert!(page.contains(r#"const POLICY = "adaptive";"#));

    let missing = http_get(addr, "/nope").await;
    assert!(missing.starts_with("HTTP/1.1 404"));
}
