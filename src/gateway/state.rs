//! Connection state types.

use std::sync::atomic::{AtomicU32, Ordering};

/// State of one gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt yet.
    Disconnected,
    /// Dialing the gateway.
    Connecting,
    /// Waiting for the server's HELLO frame.
    AwaitingHello,
    /// IDENTIFY sent, response pending.
    Identifying,
    /// Waiting for the READY dispatch.
    AwaitingReady,
    /// Handshake complete, heartbeat and listener running.
    Active,
    /// Connection lost, re-entering the handshake.
    Reconnecting,
    /// Shut down on request.
    Closed,
    /// Permanently failed; the credential will not be retried.
    Fatal,
}

/// Atomic wrapper so the owning task and its handle can share the state.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU32);

impl AtomicConnectionState {
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    #[must_use]
    pub fn load(&self) -> ConnectionState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::AwaitingHello,
            3 => ConnectionState::Identifying,
            4 => ConnectionState::AwaitingReady,
            5 => ConnectionState::Active,
            6 => ConnectionState::Reconnecting,
            7 => ConnectionState::Closed,
            _ => ConnectionState::Fatal,
        }
    }

    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u32, Ordering::SeqCst);
    }
}
