use serde::{Deserialize, Serialize};

use super::intents;

/// Opcodes for gateway envelopes.
pub mod opcode {
    pub const DISPATCH: u16 = 0;
    pub const HEARTBEAT: u16 = 1;
    pub const IDENTIFY: u16 = 2;
    pub const RECONNECT: u16 = 7;
    pub const INVALID_SESSION: u16 = 9;
    pub const HELLO: u16 = 10;
    pub const HEARTBEAT_ACK: u16 = 11;
}

/// Close/error codes. The gateway delivers these both as WebSocket close
/// frames and as envelope-borne error codes; both routes share one policy.
pub mod close_code {
    pub const UNKNOWN_ERROR: u16 = 4000;
    pub const UNKNOWN_OPCODE: u16 = 4001;
    pub const DECODE_ERROR: u16 = 4002;
    pub const AUTH_FAILED: u16 = 4004;
    pub const INVALID_SEQ: u16 = 4007;
    pub const RATE_LIMITED: u16 = 4008;
    pub const SESSION_TIMED_OUT: u16 = 4009;
    pub const INVALID_VERSION: u16 = 4012;
    pub const INVALID_INTENT: u16 = 4013;
    pub const DISALLOWED_INTENT: u16 = 4014;
}

/// Terminal failure classes. Retrying any of these would just replay a
/// request the gateway already rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    InvalidToken,
    InvalidApiVersion,
    InvalidIntents,
    DisallowedIntents,
}

/// What the policy table says to do with an opcode or close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeAction {
    /// Hand the envelope to the caller unchanged.
    Propagate,
    /// Tear down the connection and re-enter the handshake. When
    /// `discard_session` is set the resume URL and session id are dropped
    /// first.
    Reconnect { discard_session: bool },
    /// Terminate the session permanently.
    Fatal(FatalKind),
}

/// Classify an opcode or close code per the server's error taxonomy.
pub fn classify(code: u16) -> CodeAction {
    match code {
        opcode::RECONNECT => CodeAction::Reconnect {
            discard_session: false,
        },
        opcode::INVALID_SESSION => CodeAction::Reconnect {
            discard_session: true,
        },
        close_code::UNKNOWN_ERROR
        | close_code::UNKNOWN_OPCODE
        | close_code::DECODE_ERROR
        | close_code::INVALID_SEQ
        | close_code::RATE_LIMITED
        | close_code::SESSION_TIMED_OUT => CodeAction::Reconnect {
            discard_session: false,
        },
        close_code::AUTH_FAILED => CodeAction::Fatal(FatalKind::InvalidToken),
        close_code::INVALID_VERSION => CodeAction::Fatal(FatalKind::InvalidApiVersion),
        close_code::INVALID_INTENT => CodeAction::Fatal(FatalKind::InvalidIntents),
        close_code::DISALLOWED_INTENT => CodeAction::Fatal(FatalKind::DisallowedIntents),
        _ => CodeAction::Propagate,
    }
}

/// IDENTIFY payload (opcode 2).
#[derive(Debug, Clone, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: IdentifyProperties,
    pub compress: bool,
    pub presence: StatusUpdate,
    pub intents: u64,
}

impl Identify {
    /// Identify as a desktop Chrome client with message intents and
    /// stream compression enabled.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            properties: IdentifyProperties::default(),
            compress: true,
            presence: StatusUpdate {
                since: 0,
                status: "online".to_string(),
                afk: false,
            },
            intents: intents::default_intents(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub browser_user_agent: String,
    pub device: String,
    pub referer: String,
    pub referring_domain: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: "Mac OS X".to_string(),
            browser: "Chrome".to_string(),
            browser_user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                                 AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 \
                                 Safari/537.36"
                .to_string(),
            device: String::new(),
            referer: String::new(),
            referring_domain: String::new(),
        }
    }
}

/// Presence sub-object of IDENTIFY.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub since: u64,
    pub status: String,
    pub afk: bool,
}

/// HELLO payload (opcode 10).
#[derive(Debug, Deserialize)]
pub struct HelloData {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: u64,
}

/// READY payload (dispatch with type tag `READY`).
#[derive(Debug, Deserialize)]
pub struct ReadyData {
    pub resume_gateway_url: String,
    pub session_id: String,
    /// Guild membership; only the length matters here.
    #[serde(default)]
    pub guilds: Vec<serde_json::Value>,
}

/// The slice of a dispatched message this client cares about.
#[derive(Debug, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub id: Option<String>,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Option<Author>,
}

#[derive(Debug, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_codes() {
        for code in [4004, 4012, 4013, 4014] {
            assert!(
                matches!(classify(code), CodeAction::Fatal(_)),
                "code {code} should be fatal"
            );
        }
    }

    #[test]
    fn test_recoverable_codes() {
        for code in [7, 9, 4000, 4001, 4002, 4007, 4008, 4009] {
            assert!(
                matches!(classify(code), CodeAction::Reconnect { .. }),
                "code {code} should reconnect"
            );
        }
    }

    #[test]
    fn test_invalid_session_discards_resume_data() {
        assert_eq!(
            classify(opcode::INVALID_SESSION),
            CodeAction::Reconnect {
                discard_session: true
            }
        );
        assert_eq!(
            classify(opcode::RECONNECT),
            CodeAction::Reconnect {
                discard_session: false
            }
        );
    }

    #[test]
    fn test_ordinary_opcodes_propagate() {
        for code in [
            opcode::DISPATCH,
            opcode::HEARTBEAT,
            opcode::HELLO,
            opcode::HEARTBEAT_ACK,
            3,
            4011,
            4015,
        ] {
            assert_eq!(classify(code), CodeAction::Propagate);
        }
    }

    #[test]
    fn test_identify_serializes_wire_shape() {
        let identify = Identify::new("secret-token");
        let value = serde_json::to_value(&identify).unwrap();
        assert_eq!(value["token"], "secret-token");
        assert_eq!(value["compress"], true);
        assert_eq!(value["presence"]["status"], "online");
        assert_eq!(value["properties"]["browser"], "Chrome");
        assert_eq!(value["intents"], intents::default_intents());
    }

    #[test]
    fn test_ready_payload_parses() {
        let data: ReadyData = serde_json::from_value(serde_json::json!({
            "resume_gateway_url": "wss://resume.example",
            "session_id": "abc123",
            "guilds": [{"id": "1"}, {"id": "2"}],
            "ignored_extra": true,
        }))
        .unwrap();
        assert_eq!(data.session_id, "abc123");
        assert_eq!(data.guilds.len(), 2);
    }
}
