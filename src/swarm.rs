//! Fleet orchestration: one gateway session per credential, all lifecycle
//! notifications funneled into a single aggregator.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::gateway::GatewayClient;
use crate::redeem::RedeemClient;

/// Lifecycle notification from one session task to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { guilds: usize },
    Disconnected { guilds: usize },
}

/// Fleet-wide counters. Owned exclusively by the aggregator loop; session
/// tasks mutate it only by sending [`ConnectionEvent`]s, so no locking is
/// involved anywhere.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregateState {
    pub connected: i64,
    pub guilds: i64,
}

impl AggregateState {
    pub fn apply(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { guilds } => {
                self.connected += 1;
                self.guilds += *guilds as i64;
            }
            ConnectionEvent::Disconnected { guilds } => {
                self.connected -= 1;
                self.guilds -= *guilds as i64;
            }
        }
    }
}

/// Single consumer of the shared event channel. Refreshes the status line
/// after every event and returns the final counters once every sender is
/// gone.
pub async fn run_aggregator(mut rx: mpsc::Receiver<ConnectionEvent>) -> AggregateState {
    let mut state = AggregateState::default();
    while let Some(event) = rx.recv().await {
        state.apply(&event);
        render_status(&state);
    }
    state
}

fn render_status(state: &AggregateState) {
    eprintln!(
        "  \x1b[2mconnected\x1b[0m {}   \x1b[2mguilds\x1b[0m {}",
        state.connected, state.guilds
    );
}

/// Launches one session task per credential and wires them to the
/// aggregator.
pub struct Swarm {
    config: Config,
    tokens: Vec<String>,
    redeemer: Arc<RedeemClient>,
}

impl Swarm {
    pub fn new(config: Config, tokens: Vec<String>, redeemer: Arc<RedeemClient>) -> Self {
        Self {
            config,
            tokens,
            redeemer,
        }
    }

    pub fn start(self) -> SwarmHandle {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let aggregator = tokio::spawn(run_aggregator(events_rx));
        tokio::spawn(spawn_sessions(
            self.config,
            self.tokens,
            self.redeemer,
            events_tx,
            shutdown_rx,
        ));
        SwarmHandle {
            shutdown: shutdown_tx,
            aggregator,
        }
    }
}

/// Controller for a running swarm.
pub struct SwarmHandle {
    shutdown: watch::Sender<bool>,
    aggregator: JoinHandle<AggregateState>,
}

impl SwarmHandle {
    /// Propagate a close request to every session, wait for the aggregator
    /// to drain, and return the final counters.
    pub async fn shutdown(self) -> AggregateState {
        let _ = self.shutdown.send(true);
        self.aggregator.await.unwrap_or_default()
    }
}

async fn spawn_sessions(
    config: Config,
    tokens: Vec<String>,
    redeemer: Arc<RedeemClient>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    for (i, token) in tokens.into_iter().enumerate() {
        if i > 0 && !config.cooldown.is_zero() {
            // stagger launches; a burst of identifies trips the gateway
            // rate limit
            tokio::select! {
                _ = tokio::time::sleep(config.cooldown) => {}
                _ = shutdown.wait_for(|stop| *stop) => return,
            }
        }
        tokio::spawn(run_session(
            config.gateway_url.clone(),
            token,
            Arc::clone(&redeemer),
            events_tx.clone(),
            shutdown.clone(),
        ));
    }
}

/// One credential's lifecycle: handshake, notify the aggregator, wait for
/// the session to end (or process shutdown), notify again. A credential
/// whose handshake fails terminally is logged and abandoned.
async fn run_session(
    gateway_url: String,
    token: String,
    redeemer: Arc<RedeemClient>,
    events: mpsc::Sender<ConnectionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = GatewayClient::new(gateway_url, token, redeemer);
    let label = client.label().to_string();
    let mut handle = tokio::select! {
        result = client.run() => match result {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("[{label}] abandoning credential: {e}");
                return;
            }
        },
        _ = shutdown.wait_for(|stop| *stop) => return,
    };

    let guilds = handle.guild_count();
    if events
        .send(ConnectionEvent::Connected { guilds })
        .await
        .is_err()
    {
        return;
    }

    let interrupted = tokio::select! {
        _ = handle.closed() => false,
        _ = shutdown.wait_for(|stop| *stop) => true,
    };
    if interrupted {
        handle.close().await;
    }

    let _ = events.send(ConnectionEvent::Disconnected { guilds }).await;
}
