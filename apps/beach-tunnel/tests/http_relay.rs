use std::net::SocketAddr;
use std::time::Duration;

use beach_relay::{RelayState, build_router, config::Config};
use beach_tunnel::error::SignalError;
use beach_tunnel::signaling::{
    ConnectInfo, HandshakeMessage, HandshakePayload, HttpRelay, PullOutcome, RelayClient,
};
use tokio::net::TcpListener;

async fn serve_relay(pull_timeout: Duration) -> SocketAddr {
    let config = Config {
        pull_timeout,
        ..Config::default()
    };
    let app = build_router(RelayState::new(&config));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

#[test_timeout::tokio_timeout_test(15)]
async fn pushed_payload_comes_back_from_pull() {
    let addr = serve_relay(Duration::from_secs(2)).await;
    let relay = HttpRelay::new(&format!("http://{addr}")).expect("client");

    let message = HandshakeMessage::new("dialer-1".into(), None, HandshakePayload::Request);
    relay
        .push("room1", &message.encode().expect("encode"))
        .await
        .expect("push");

    match relay.pull_once("room1").await.expect("pull") {
        PullOutcome::Payload(info) => {
            assert_eq!(info.source, "dialer-1");
            assert_eq!(HandshakeMessage::decode(&info).expect("decode"), message);
        }
        other => panic!("expected payload, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test(15)]
async fn idle_mailbox_reports_empty() {
    let addr = serve_relay(Duration::from_millis(100)).await;
    let relay = HttpRelay::new(&format!("http://{addr}/")).expect("client");
    assert!(matches!(
        relay.pull_once("nobody-here").await.expect("pull"),
        PullOutcome::Empty
    ));
}

#[test_timeout::tokio_timeout_test(15)]
async fn unknown_route_surfaces_status() {
    let addr = serve_relay(Duration::from_millis(100)).await;
    let relay = HttpRelay::new(&format!("http://{addr}/not-a-relay")).expect("client");
    let info = ConnectInfo {
        source: "dialer-1".to_string(),
        sdp: "e30=".to_string(),
    };
    match relay.push("room1", &info).await {
        Err(SignalError::Status(404)) => {}
        other => panic!("expected 404, got {other:?}"),
    }
    match relay.pull_once("room1").await {
        Err(SignalError::Status(404)) => {}
        other => panic!("expected 404, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test(15)]
async fn unreachable_relay_is_an_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let relay = HttpRelay::new(&format!("http://{addr}")).expect("client");
    assert!(matches!(
        relay.pull_once("room1").await,
        Err(SignalError::Http(_))
    ));
}
