//! Gateway WebSocket client.
//!
//! One [`GatewayClient`] owns one credential's session: the
//! HELLO/IDENTIFY/READY handshake, the heartbeat keep-alive, the listen
//! loop, and reconnection with bounded backoff. After the handshake the
//! connection is shared by exactly two sub-tasks — the heartbeat sender and
//! the listener — and every write goes through a single writer task that
//! owns the sink.

pub mod codec;
pub mod events;
pub mod intents;
pub mod reconnect;
pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::GatewayError;
use crate::gift;
use crate::redeem::RedeemClient;
use crate::snowflake;
use codec::Envelope;
use events::{opcode, CodeAction, HelloData, Identify, MessageData, ReadyData};
use reconnect::ReconnectPolicy;
pub use state::{AtomicConnectionState, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Live I/O for one connection attempt.
///
/// Dropping it releases the connection: the heartbeat task stops when the
/// stop sender goes away, and the writer task drains its channel, flushes a
/// close frame if one was queued, and closes the sink.
struct SessionIo {
    read: WsRead,
    writer: mpsc::Sender<Message>,
    _stop: watch::Sender<bool>,
}

/// What the shared frame dispatcher decided.
#[derive(Debug)]
enum FrameAction {
    /// Nothing to do at the connection level; the envelope is passed along.
    Continue(Envelope),
    /// The server asked for a reconnect.
    Reconnect { discard_session: bool },
}

/// Why the listen loop returned.
enum Listen {
    Shutdown,
    Reconnect {
        discard_session: bool,
        reason: String,
    },
    Fatal(GatewayError),
}

/// A single credential's gateway session.
///
/// The client persists across reconnects — session state (resume URL,
/// session id, sequence) is mutated in place, never recreated — and is torn
/// down only on a fatal classification or an explicit close.
pub struct GatewayClient {
    label: String,
    identify: Identify,
    /// Configured gateway endpoint; dialed when no resume data is held.
    home_url: String,
    /// Current dial target. Becomes the resume URL once READY arrives.
    gateway_url: String,
    session_id: Option<String>,
    sequence: u64,
    last_ack: Option<Instant>,
    guilds: usize,
    redeemer: Arc<RedeemClient>,
    policy: ReconnectPolicy,
    state: Arc<AtomicConnectionState>,
}

impl GatewayClient {
    pub fn new(
        gateway_url: impl Into<String>,
        token: impl Into<String>,
        redeemer: Arc<RedeemClient>,
    ) -> Self {
        let token = token.into();
        let gateway_url = gateway_url.into();
        Self {
            label: mask(&token),
            identify: Identify::new(token),
            home_url: gateway_url.clone(),
            gateway_url,
            session_id: None,
            sequence: 0,
            last_ack: None,
            guilds: 0,
            redeemer,
            policy: ReconnectPolicy::default(),
            state: Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected)),
        }
    }

    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Drive the session to Active: handshake (with the bounded retry
    /// policy), then start the heartbeat, writer, and listener tasks. The
    /// returned handle observes and controls the running session.
    pub async fn run(mut self) -> Result<ClientHandle, GatewayError> {
        let io = self.connect_with_retry(None).await?;
        self.state.store(ConnectionState::Active);
        tracing::info!(
            "[{}] session {} active with {} guilds",
            self.label,
            self.session_id.as_deref().unwrap_or("<none>"),
            self.guilds
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);
        let handle = ClientHandle {
            label: self.label.clone(),
            guilds: self.guilds,
            state: Arc::clone(&self.state),
            shutdown: shutdown_tx,
            closed: closed_rx,
        };
        tokio::spawn(self.drive(io, shutdown_rx, closed_tx));
        Ok(handle)
    }

    /// One handshake attempt: dial, HELLO, IDENTIFY, READY, spawn the
    /// per-connection tasks. Handshake frames are read and written strictly
    /// sequentially; only afterwards do the sub-tasks share the connection.
    async fn handshake(&mut self) -> Result<SessionIo, GatewayError> {
        self.state.store(ConnectionState::Connecting);
        tracing::debug!("[{}] connecting to {}", self.label, self.gateway_url);
        let mut request = self.gateway_url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Accept-Encoding", HeaderValue::from_static("zlib"));
        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut read) = ws.split();

        self.state.store(ConnectionState::AwaitingHello);
        let frame = match read.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                return Err(GatewayError::HandshakeIo {
                    stage: "read hello frame",
                    source: e,
                })
            }
            None => {
                return Err(GatewayError::ConnectionLost(
                    "closed before hello".to_string(),
                ))
            }
        };
        let hello = codec::decode(&frame).map_err(|e| GatewayError::Handshake {
            stage: "decode hello frame",
            reason: e.to_string(),
        })?;
        if hello.op != opcode::HELLO {
            return Err(GatewayError::Handshake {
                stage: "read hello frame",
                reason: format!("expected opcode {}, received {}", opcode::HELLO, hello.op),
            });
        }
        let hello_data: HelloData = serde_json::from_value(
            hello.data.unwrap_or(serde_json::Value::Null),
        )
        .map_err(|e| GatewayError::Handshake {
            stage: "decode hello frame",
            reason: e.to_string(),
        })?;
        self.last_ack = Some(Instant::now());

        self.state.store(ConnectionState::Identifying);
        let identify = json!({ "op": opcode::IDENTIFY, "d": &self.identify });
        sink.send(Message::Text(identify.to_string().into()))
            .await
            .map_err(|e| GatewayError::HandshakeIo {
                stage: "send identify frame",
                source: e,
            })?;
        // re-identifying starts a brand-new session
        self.sequence = 0;

        self.state.store(ConnectionState::AwaitingReady);
        let frame = match read.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                return Err(GatewayError::HandshakeIo {
                    stage: "read ready frame",
                    source: e,
                })
            }
            None => {
                return Err(GatewayError::ConnectionLost(
                    "closed before ready".to_string(),
                ))
            }
        };
        match self.handle_frame(&frame) {
            Ok(FrameAction::Continue(envelope)) => {
                // The first post-identify frame may legitimately not be
                // READY; session fields just stay as they were.
                if envelope.event_type.as_deref() == Some("READY") {
                    let ready: ReadyData = serde_json::from_value(
                        envelope.data.unwrap_or(serde_json::Value::Null),
                    )
                    .map_err(|e| GatewayError::Handshake {
                        stage: "decode ready frame",
                        reason: e.to_string(),
                    })?;
                    self.session_id = Some(ready.session_id);
                    self.gateway_url = ready.resume_gateway_url;
                    self.guilds = ready.guilds.len();
                }
            }
            Ok(FrameAction::Reconnect { .. }) => {
                return Err(GatewayError::ConnectionLost(
                    "session rejected during handshake".to_string(),
                ))
            }
            Err(GatewayError::Decode(e)) => {
                return Err(GatewayError::Handshake {
                    stage: "decode ready frame",
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        }

        let (writer_tx, writer_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        spawn_writer(sink, writer_rx);
        spawn_heartbeat(
            writer_tx.clone(),
            hello_data.heartbeat_interval,
            stop_rx,
            self.label.clone(),
        );

        Ok(SessionIo {
            read,
            writer: writer_tx,
            _stop: stop_tx,
        })
    }

    /// Handshake wrapped in the retry policy. Fatal classifications are
    /// returned immediately; transport failures back off and try again up to
    /// the configured ceiling.
    async fn connect_with_retry(
        &mut self,
        mut shutdown: Option<&mut watch::Receiver<bool>>,
    ) -> Result<SessionIo, GatewayError> {
        let mut attempt: u32 = 0;
        loop {
            match self.handshake().await {
                Ok(io) => return Ok(io),
                Err(e) if e.is_fatal() => {
                    self.state.store(ConnectionState::Fatal);
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    if !self.policy.should_retry(attempt) {
                        self.state.store(ConnectionState::Fatal);
                        tracing::error!("[{}] connect attempt {attempt} failed: {e}", self.label);
                        return Err(GatewayError::RetriesExhausted { attempts: attempt });
                    }
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        "[{}] connect attempt {attempt} failed: {e}; retrying in {delay:?}",
                        self.label
                    );
                    match shutdown.as_mut() {
                        Some(rx) => {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = rx.wait_for(|stop| *stop) => return Err(GatewayError::Closed),
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }
    }

    /// Session owner task: listen until the connection dies, reconnect when
    /// the classification allows it, and signal `closed` exactly once on the
    /// way out.
    async fn drive(
        mut self,
        mut io: SessionIo,
        mut shutdown: watch::Receiver<bool>,
        closed: watch::Sender<bool>,
    ) {
        loop {
            let next = self.listen(&mut io, &mut shutdown).await;
            release(io).await;
            io = match next {
                Listen::Shutdown => {
                    self.state.store(ConnectionState::Closed);
                    tracing::info!("[{}] closed", self.label);
                    break;
                }
                Listen::Fatal(e) => {
                    self.state.store(ConnectionState::Fatal);
                    tracing::error!("[{}] terminating session: {e}", self.label);
                    break;
                }
                Listen::Reconnect {
                    discard_session,
                    reason,
                } => {
                    if discard_session {
                        self.discard_session();
                    }
                    self.state.store(ConnectionState::Reconnecting);
                    tracing::warn!("[{}] reconnecting: {reason}", self.label);
                    match self.connect_with_retry(Some(&mut shutdown)).await {
                        Ok(new_io) => {
                            self.state.store(ConnectionState::Active);
                            tracing::info!(
                                "[{}] session {} re-established",
                                self.label,
                                self.session_id.as_deref().unwrap_or("<none>")
                            );
                            new_io
                        }
                        Err(GatewayError::Closed) => {
                            self.state.store(ConnectionState::Closed);
                            tracing::info!("[{}] closed while reconnecting", self.label);
                            break;
                        }
                        Err(e) => {
                            tracing::error!("[{}] giving up on session: {e}", self.label);
                            break;
                        }
                    }
                }
            };
        }
        let _ = closed.send(true);
    }

    /// Blocking read loop. Returns only when the connection is done for:
    /// shutdown requested, a close/error classified the session, or the read
    /// itself failed. A single undecodable frame is logged and dropped.
    async fn listen(
        &mut self,
        io: &mut SessionIo,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Listen {
        loop {
            let frame = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return Listen::Shutdown,
                frame = io.read.next() => frame,
            };
            match frame {
                None => {
                    return Listen::Reconnect {
                        discard_session: false,
                        reason: "stream ended".to_string(),
                    }
                }
                Some(Err(e)) => {
                    return Listen::Reconnect {
                        discard_session: false,
                        reason: format!("read failed: {e}"),
                    }
                }
                Some(Ok(Message::Close(close))) => return self.classify_close(close.as_ref()),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(frame)) => match self.handle_frame(&frame) {
                    Ok(FrameAction::Continue(_)) => {}
                    Ok(FrameAction::Reconnect { discard_session }) => {
                        return Listen::Reconnect {
                            discard_session,
                            reason: "server requested reconnect".to_string(),
                        }
                    }
                    Err(GatewayError::Decode(e)) => {
                        tracing::warn!("[{}] dropping undecodable frame: {e}", self.label);
                    }
                    Err(e) => return Listen::Fatal(e),
                },
            }
        }
    }

    /// Shared dispatcher for handshake and steady-state frames: decode, fold
    /// the sequence number, forward matching messages, then apply the
    /// opcode policy table.
    fn handle_frame(&mut self, frame: &Message) -> Result<FrameAction, GatewayError> {
        let envelope = codec::decode(frame)?;
        if let Some(seq) = envelope.seq {
            // within one session the sequence only moves forward
            self.sequence = self.sequence.max(seq);
        }
        match envelope.op {
            opcode::HEARTBEAT_ACK => self.last_ack = Some(Instant::now()),
            opcode::DISPATCH => {
                if matches!(
                    envelope.event_type.as_deref(),
                    Some("MESSAGE_CREATE" | "MESSAGE_UPDATE")
                ) {
                    self.dispatch_message(&envelope);
                }
            }
            _ => {}
        }
        match events::classify(envelope.op) {
            CodeAction::Propagate => Ok(FrameAction::Continue(envelope)),
            CodeAction::Reconnect { discard_session } => {
                Ok(FrameAction::Reconnect { discard_session })
            }
            CodeAction::Fatal(kind) => Err(kind.into()),
        }
    }

    fn classify_close(&self, close: Option<&CloseFrame>) -> Listen {
        let Some(close) = close else {
            return Listen::Reconnect {
                discard_session: false,
                reason: "connection closed".to_string(),
            };
        };
        let code = u16::from(close.code);
        match events::classify(code) {
            CodeAction::Fatal(kind) => Listen::Fatal(kind.into()),
            CodeAction::Reconnect { discard_session } => Listen::Reconnect {
                discard_session,
                reason: format!("close code {code}"),
            },
            CodeAction::Propagate => Listen::Reconnect {
                discard_session: false,
                reason: format!("connection closed ({code})"),
            },
        }
    }

    /// Forward a dispatched message to the redemption path when its content
    /// carries a gift link.
    fn dispatch_message(&self, envelope: &Envelope) {
        let Some(data) = envelope.data.clone() else {
            return;
        };
        let message: MessageData = match serde_json::from_value(data) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("[{}] unreadable message payload: {e}", self.label);
                return;
            }
        };
        let Some(code) = gift::extract_code(&message.content) else {
            return;
        };
        let author = message
            .author
            .as_ref()
            .map(|author| author.username.clone())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::info!(
            "[{}] gift code {code} from {author} in channel {}",
            self.label,
            message.channel_id
        );
        let code = code.to_string();
        let channel_id = message.channel_id;
        let message_id = message.id;
        let redeemer = Arc::clone(&self.redeemer);
        tokio::spawn(async move {
            match redeemer.redeem(&code, &channel_id).await {
                Ok(()) => match message_id.as_deref().and_then(snowflake::age_of) {
                    Some(age) => {
                        tracing::info!("redeemed gift code {code} ({age:?} after post)");
                    }
                    None => tracing::info!("redeemed gift code {code}"),
                },
                Err(e) => tracing::warn!("failed to redeem gift code {code}: {e}"),
            }
        });
    }

    /// Drop resume data so the next handshake starts from the configured
    /// endpoint with a fresh session.
    fn discard_session(&mut self) {
        self.gateway_url = self.home_url.clone();
        self.session_id = None;
        self.sequence = 0;
    }
}

/// Observer/controller for a running session. The session itself lives in a
/// spawned task and survives reconnects; `guild_count` reports what the
/// first READY carried.
#[derive(Debug)]
pub struct ClientHandle {
    label: String,
    guilds: usize,
    state: Arc<AtomicConnectionState>,
    shutdown: watch::Sender<bool>,
    closed: watch::Receiver<bool>,
}

impl ClientHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn guild_count(&self) -> usize {
        self.guilds
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Wait until the session task has fully stopped.
    pub async fn closed(&mut self) {
        let _ = self.closed.wait_for(|closed| *closed).await;
    }

    /// Ask the session to stop, then wait until it has. Safe to call more
    /// than once.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);
        self.closed().await;
    }
}

/// Queue a polite close frame, then drop the channel so the writer task
/// flushes and exits and the heartbeat stops.
async fn release(io: SessionIo) {
    let _ = io.writer.send(Message::Close(None)).await;
}

/// The writer task exclusively owns the sink; every post-handshake write is
/// funneled through its channel so the heartbeat never races another writer.
fn spawn_writer(mut sink: WsSink, mut rx: mpsc::Receiver<Message>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });
}

/// Send `{"op":1,"d":null}` every `interval_ms`. A failed send means the
/// connection is gone: log and stop — the listener tears the session down
/// when it observes the failure on its side.
fn spawn_heartbeat(
    writer: mpsc::Sender<Message>,
    interval_ms: u64,
    mut stop: watch::Receiver<bool>,
    label: String,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = json!({ "op": opcode::HEARTBEAT, "d": null });
                    if writer.send(Message::Text(frame.to_string().into())).await.is_err() {
                        tracing::warn!("[{label}] failed to send heartbeat, stopping");
                        break;
                    }
                }
                _ = stop.changed() => break,
            }
        }
    });
}

/// First few characters of the token, for log lines.
fn mask(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    if prefix.len() == token.len() {
        prefix
    } else {
        format!("{prefix}…")
    }
}
