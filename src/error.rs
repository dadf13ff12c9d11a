use std::fmt;

use tokio_tungstenite::tungstenite;

use crate::gateway::codec::DecodeError;
use crate::gateway::events::FatalKind;

/// Everything that can go wrong with one gateway session.
///
/// `is_fatal` splits the taxonomy: fatal errors terminate the credential's
/// session permanently, everything else is eligible for the reconnect policy.
/// A bare [`GatewayError::Decode`] is neither — the listener logs and drops
/// the frame.
#[derive(Debug)]
pub enum GatewayError {
    /// Transport failure while dialing or talking to the gateway.
    Connect(tungstenite::Error),
    /// I/O failure in the middle of the handshake.
    HandshakeIo {
        stage: &'static str,
        source: tungstenite::Error,
    },
    /// The gateway sent something the handshake cannot accept.
    Handshake {
        stage: &'static str,
        reason: String,
    },
    /// A frame failed to decode.
    Decode(DecodeError),
    /// The stream ended or was reset.
    ConnectionLost(String),
    InvalidToken,
    InvalidApiVersion,
    InvalidIntents,
    DisallowedIntents,
    /// The reconnect policy ran out of attempts.
    RetriesExhausted { attempts: u32 },
    /// Shutdown was requested while the session was retrying.
    Closed,
}

impl GatewayError {
    /// True when retrying can never succeed for this credential.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Handshake { .. }
                | GatewayError::InvalidToken
                | GatewayError::InvalidApiVersion
                | GatewayError::InvalidIntents
                | GatewayError::DisallowedIntents
                | GatewayError::RetriesExhausted { .. }
        )
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Connect(e) => write!(f, "connection failed: {e}"),
            GatewayError::HandshakeIo { stage, source } => {
                write!(f, "failed to {stage}: {source}")
            }
            GatewayError::Handshake { stage, reason } => {
                write!(f, "failed to {stage}: {reason}")
            }
            GatewayError::Decode(e) => write!(f, "failed to decode frame: {e}"),
            GatewayError::ConnectionLost(reason) => write!(f, "connection lost: {reason}"),
            GatewayError::InvalidToken => write!(f, "invalid token"),
            GatewayError::InvalidApiVersion => write!(f, "invalid API version"),
            GatewayError::InvalidIntents => write!(f, "invalid intents"),
            GatewayError::DisallowedIntents => write!(f, "disallowed intents"),
            GatewayError::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
            GatewayError::Closed => write!(f, "client closed"),
        }
    }
}

impl From<tungstenite::Error> for GatewayError {
    fn from(e: tungstenite::Error) -> Self {
        GatewayError::Connect(e)
    }
}

impl From<DecodeError> for GatewayError {
    fn from(e: DecodeError) -> Self {
        GatewayError::Decode(e)
    }
}

impl From<FatalKind> for GatewayError {
    fn from(kind: FatalKind) -> Self {
        match kind {
            FatalKind::InvalidToken => GatewayError::InvalidToken,
            FatalKind::InvalidApiVersion => GatewayError::InvalidApiVersion,
            FatalKind::InvalidIntents => GatewayError::InvalidIntents,
            FatalKind::DisallowedIntents => GatewayError::DisallowedIntents,
        }
    }
}
