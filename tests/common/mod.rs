#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{any, post};
use axum::{Json, Router};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::json;

use gifthawk::gateway::reconnect::ReconnectPolicy;

/// What the mock gateway should do to each connecting session.
#[derive(Clone)]
pub struct GatewayScript {
    /// Opcode of the first frame (a real gateway sends HELLO = 10).
    pub hello_op: u16,
    pub heartbeat_interval_ms: u64,
    /// Deliver HELLO as a zlib-compressed binary frame.
    pub compress_hello: bool,
    /// Guild count carried by READY.
    pub guilds: usize,
    /// Send an unrelated dispatch instead of READY after IDENTIFY.
    pub skip_ready: bool,
    /// Actions to run after READY, on the first connection only.
    pub after_ready: Vec<ServerAction>,
}

impl Default for GatewayScript {
    fn default() -> Self {
        Self {
            hello_op: 10,
            heartbeat_interval_ms: 45_000,
            compress_hello: false,
            guilds: 0,
            skip_ready: false,
            after_ready: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub enum ServerAction {
    /// Send an envelope as a text frame.
    Send(serde_json::Value),
    /// Close the socket with the given close code.
    CloseWith(u16),
    WaitMs(u64),
}

/// Handle onto a spawned mock gateway, with counters the tests assert on.
pub struct MockGateway {
    pub url: String,
    pub api_url: String,
    pub connections: Arc<AtomicUsize>,
    pub identifies: Arc<Mutex<Vec<serde_json::Value>>>,
    pub heartbeats: Arc<AtomicUsize>,
    /// `(code, channel_id)` pairs the redemption endpoint received.
    pub redeems: Arc<Mutex<Vec<(String, String)>>>,
}

#[derive(Clone)]
struct MockState {
    script: Arc<GatewayScript>,
    url: String,
    connections: Arc<AtomicUsize>,
    identifies: Arc<Mutex<Vec<serde_json::Value>>>,
    heartbeats: Arc<AtomicUsize>,
    redeems: Arc<Mutex<Vec<(String, String)>>>,
}

/// Bind on port 0, spawn the mock gateway + redemption API, return a handle.
pub async fn spawn(script: GatewayScript) -> MockGateway {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let url = format!("ws://127.0.0.1:{port}");
    let api_url = format!("http://127.0.0.1:{port}");

    let state = MockState {
        script: Arc::new(script),
        url: url.clone(),
        connections: Arc::new(AtomicUsize::new(0)),
        identifies: Arc::new(Mutex::new(Vec::new())),
        heartbeats: Arc::new(AtomicUsize::new(0)),
        redeems: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/", any(ws_upgrade))
        .route("/entitlements/gift-codes/{code}/redeem", post(redeem))
        .with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockGateway {
        url,
        api_url,
        connections: state.connections,
        identifies: state.identifies,
        heartbeats: state.heartbeats,
        redeems: state.redeems,
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<MockState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: MockState) {
    let n = state.connections.fetch_add(1, Ordering::SeqCst);
    let script = Arc::clone(&state.script);

    let hello = json!({
        "op": script.hello_op,
        "s": null,
        "t": null,
        "d": { "heartbeat_interval": script.heartbeat_interval_ms }
    });
    let frame = if script.compress_hello {
        Message::Binary(zlib(&hello.to_string()).into())
    } else {
        Message::Text(hello.to_string().into())
    };
    if socket.send(frame).await.is_err() {
        return;
    }

    // Wait for IDENTIFY, counting any heartbeat that arrives first
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                match value["op"].as_u64() {
                    Some(2) => {
                        state.identifies.lock().unwrap().push(value);
                        break;
                    }
                    Some(1) => {
                        state.heartbeats.fetch_add(1, Ordering::SeqCst);
                    }
                    _ => {}
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            _ => {}
        }
    }

    let ready = if script.skip_ready {
        json!({ "op": 0, "s": 1, "t": "TYPING_START", "d": {} })
    } else {
        let guilds: Vec<serde_json::Value> = (0..script.guilds)
            .map(|i| json!({ "id": format!("{i}") }))
            .collect();
        json!({
            "op": 0,
            "s": 1,
            "t": "READY",
            "d": {
                "session_id": format!("session-{n}"),
                "resume_gateway_url": state.url,
                "guilds": guilds,
            }
        })
    };
    if socket.send(Message::Text(ready.to_string().into())).await.is_err() {
        return;
    }

    if n == 0 {
        for action in &script.after_ready {
            match action {
                ServerAction::Send(value) => {
                    if socket
                        .send(Message::Text(value.to_string().into()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                ServerAction::CloseWith(code) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: *code,
                            reason: "scripted".into(),
                        })))
                        .await;
                    return;
                }
                ServerAction::WaitMs(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
            }
        }
    }

    // Drain heartbeats until the peer goes away
    while let Some(Ok(frame)) = socket.recv().await {
        match frame {
            Message::Text(text) => {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                    if value["op"].as_u64() == Some(1) {
                        state.heartbeats.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn redeem(
    State(state): State<MockState>,
    Path(code): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let channel = body["channel_id"].as_str().unwrap_or_default().to_string();
    state.redeems.lock().unwrap().push((code, channel));
    Json(json!({}))
}

fn zlib(json: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Reconnect policy tight enough for tests.
pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        max_attempts: Some(3),
    }
}

/// Poll `check` every 10ms until it passes or `deadline_ms` elapses.
pub async fn wait_until<F: Fn() -> bool>(deadline_ms: u64, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(deadline_ms);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
