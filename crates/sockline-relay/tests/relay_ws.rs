//! End-to-end tests driving the relay over real WebSocket connections.

use axum::{routing::get, Router};
use futures::{SinkExt, StreamExt};
use sockline_relay::{config::Config, state::AppState, ws};
use sockline_types::{ClientFrame, ServerFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serve the relay router on an ephemeral port and return its address.
async fn spawn_relay(config: Config) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(config));
    let app = Router::new()
        .route("/ws", get(ws::upgrade))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{}/ws", addr);
    let (ws, _response) = connect_async(&url).await.unwrap();
    ws
}

async fn send_frame(ws: &mut WsClient, frame: &ClientFrame) {
    let json = serde_json::to_string(frame).unwrap();
    ws.send(Message::Text(json)).await.unwrap();
}

/// Read frames until the next text frame, with a deadline.
async fn recv_frame(ws: &mut WsClient) -> ServerFrame {
    timeout(Duration::from_secs(2), async {
        while let Some(msg) = ws.next().await {
            if let Ok(Message::Text(text)) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
        panic!("socket closed before a text frame arrived");
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Round-trip a ping, which also proves the session is registered with
/// the hub (registration happens before the receive loop starts).
async fn await_ready(ws: &mut WsClient, nonce: u64) {
    send_frame(ws, &ClientFrame::Ping { nonce }).await;
    match recv_frame(ws).await {
        ServerFrame::Pong { nonce: echoed } => assert_eq!(echoed, nonce),
        other => panic!("unexpected frame: {:?}", other),
    }
}

/// Publish and read until both the receipt and the publisher's own fan-out
/// copy have arrived. Returns the assigned sequence number.
async fn publish_and_await_receipt(ws: &mut WsClient, body: &str) -> u64 {
    let id = Uuid::new_v4();
    send_frame(
        ws,
        &ClientFrame::Publish {
            id,
            body: body.to_string(),
        },
    )
    .await;

    let mut seq = None;
    let mut echoed = false;
    while seq.is_none() || !echoed {
        match recv_frame(ws).await {
            ServerFrame::Delivered { id: acked, seq: s } => {
                assert_eq!(acked, id);
                seq = Some(s);
            }
            ServerFrame::Message { .. } => echoed = true,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
    seq.unwrap()
}

#[tokio::test]
async fn test_publish_is_acked_and_fanned_out_to_every_client() {
    let (addr, _state) = spawn_relay(Config::default()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    await_ready(&mut alice, 1).await;
    await_ready(&mut bob, 2).await;

    let id = Uuid::new_v4();
    send_frame(
        &mut alice,
        &ClientFrame::Publish {
            id,
            body: "hello".to_string(),
        },
    )
    .await;

    // The publisher sees both the receipt and its own fan-out copy.
    let mut got_receipt = false;
    let mut got_copy = false;
    for _ in 0..2 {
        match recv_frame(&mut alice).await {
            ServerFrame::Delivered { id: acked, seq } => {
                assert_eq!(acked, id);
                assert_eq!(seq, 1);
                got_receipt = true;
            }
            ServerFrame::Message { seq, body } => {
                assert_eq!(seq, 1);
                assert_eq!(body, "hello");
                got_copy = true;
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
    assert!(got_receipt && got_copy);

    match recv_frame(&mut bob).await {
        ServerFrame::Message { seq, body } => {
            assert_eq!(seq, 1);
            assert_eq!(body, "hello");
        }
        other => panic!("unexpected frame: {:?}", other),
    }
}

#[tokio::test]
async fn test_late_joiner_receives_replayed_history_in_order() {
    let config = Config {
        history_limit: 10,
        ..Default::default()
    };
    let (addr, _state) = spawn_relay(config).await;

    let mut alice = connect(addr).await;
    await_ready(&mut alice, 1).await;
    let first = publish_and_await_receipt(&mut alice, "first").await;
    let second = publish_and_await_receipt(&mut alice, "second").await;
    assert_eq!((first, second), (1, 2));

    // A client joining now gets the retained history before anything live.
    let mut bob = connect(addr).await;
    for (expected_seq, expected_body) in [(1, "first"), (2, "second")] {
        match recv_frame(&mut bob).await {
            ServerFrame::Message { seq, body } => {
                assert_eq!(seq, expected_seq);
                assert_eq!(body, expected_body);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_history_replay_is_bounded_by_the_configured_limit() {
    let config = Config {
        history_limit: 2,
        ..Default::default()
    };
    let (addr, _state) = spawn_relay(config).await;

    let mut alice = connect(addr).await;
    await_ready(&mut alice, 1).await;
    for body in ["one", "two", "three"] {
        publish_and_await_receipt(&mut alice, body).await;
    }

    let mut bob = connect(addr).await;
    for (expected_seq, expected_body) in [(2, "two"), (3, "three")] {
        match recv_frame(&mut bob).await {
            ServerFrame::Message { seq, body } => {
                assert_eq!(seq, expected_seq);
                assert_eq!(body, expected_body);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_ping_round_trips_with_the_same_nonce() {
    let (addr, _state) = spawn_relay(Config::default()).await;
    let mut client = connect(addr).await;

    send_frame(&mut client, &ClientFrame::Ping { nonce: 42 }).await;
    match recv_frame(&mut client).await {
        ServerFrame::Pong { nonce } => assert_eq!(nonce, 42),
        other => panic!("unexpected frame: {:?}", other),
    }
}

#[tokio::test]
async fn test_close_is_confirmed_and_fanout_stops() {
    let (addr, state) = spawn_relay(Config::default()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    await_ready(&mut alice, 1).await;
    await_ready(&mut bob, 2).await;

    send_frame(
        &mut alice,
        &ClientFrame::Close {
            code: 1000,
            reason: "done".to_string(),
        },
    )
    .await;
    match recv_frame(&mut alice).await {
        ServerFrame::Closed { code, reason } => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "done");
        }
        other => panic!("unexpected frame: {:?}", other),
    }

    // Alice is out of the registry, so Bob's publish never reaches her.
    publish_and_await_receipt(&mut bob, "after close").await;
    let quiet = timeout(Duration::from_millis(300), alice.next()).await;
    assert!(quiet.is_err(), "expected no further frames, got {:?}", quiet);

    assert_eq!(state.hub.messages_relayed(), 1);
}

#[tokio::test]
async fn test_clients_beyond_capacity_are_refused() {
    let config = Config {
        max_connections: 1,
        ..Default::default()
    };
    let (addr, _state) = spawn_relay(config).await;

    let mut alice = connect(addr).await;
    await_ready(&mut alice, 1).await;

    let mut refused = connect(addr).await;
    match recv_frame(&mut refused).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, "capacity"),
        other => panic!("unexpected frame: {:?}", other),
    }

    // The refused socket is closed by the relay.
    let next = timeout(Duration::from_secs(2), refused.next())
        .await
        .expect("timed out waiting for close");
    assert!(matches!(next, None | Some(Ok(Message::Close(_)))));

    // The first client is unaffected.
    await_ready(&mut alice, 3).await;
}

#[tokio::test]
async fn test_malformed_frames_get_an_error_without_dropping_the_session() {
    let (addr, _state) = spawn_relay(Config::default()).await;
    let mut client = connect(addr).await;
    await_ready(&mut client, 1).await;

    client
        .send(Message::Text("{not json".to_string()))
        .await
        .unwrap();
    match recv_frame(&mut client).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, "bad_frame"),
        other => panic!("unexpected frame: {:?}", other),
    }

    // The session is still alive afterwards.
    await_ready(&mut client, 2).await;
}
