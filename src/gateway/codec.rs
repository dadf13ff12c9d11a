use std::fmt;
use std::io::Read;

use flate2::read::ZlibDecoder;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

/// One decoded unit of gateway traffic.
///
/// `data` stays an untyped value until the dispatcher knows what shape to
/// expect from the opcode / type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u16,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum DecodeError {
    Compression(std::io::Error),
    Json(serde_json::Error),
    /// Control frames (ping/pong/raw) carry no envelope.
    NotDataFrame,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Compression(e) => write!(f, "zlib decompression failed: {e}"),
            DecodeError::Json(e) => write!(f, "envelope parse failed: {e}"),
            DecodeError::NotDataFrame => write!(f, "frame carries no envelope"),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e)
    }
}

/// Decode a raw inbound frame into an [`Envelope`].
///
/// Binary frames are a zlib-compressed JSON document (the gateway compresses
/// when the connection negotiated it); text frames parse directly.
pub fn decode(frame: &Message) -> Result<Envelope, DecodeError> {
    match frame {
        Message::Text(text) => Ok(serde_json::from_str(text.as_str())?),
        Message::Binary(bytes) => {
            let mut json = String::new();
            ZlibDecoder::new(bytes.as_ref())
                .read_to_string(&mut json)
                .map_err(DecodeError::Compression)?;
            Ok(serde_json::from_str(&json)?)
        }
        _ => Err(DecodeError::NotDataFrame),
    }
}

/// Encode an envelope as an uncompressed text frame.
pub fn encode(envelope: &Envelope) -> Result<Message, DecodeError> {
    Ok(Message::Text(serde_json::to_string(envelope)?.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(json: &str) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_text_frame_round_trip() {
        let envelope = Envelope {
            op: 0,
            seq: Some(42),
            event_type: Some("MESSAGE_CREATE".to_string()),
            data: Some(serde_json::json!({"content": "hi"})),
        };
        let frame = encode(&envelope).unwrap();
        assert!(frame.is_text());
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_optional_fields_are_omitted_when_absent() {
        let envelope = Envelope {
            op: 1,
            seq: None,
            event_type: None,
            data: None,
        };
        let frame = encode(&envelope).unwrap();
        let text = frame.into_text().unwrap();
        assert_eq!(text.as_str(), r#"{"op":1}"#);
    }

    #[test]
    fn test_compressed_hello_decodes() {
        let raw = r#"{"op":10,"s":null,"t":null,"d":{"heartbeat_interval":41250}}"#;
        let frame = Message::Binary(zlib(raw).into());
        let envelope = decode(&frame).unwrap();
        assert_eq!(envelope.op, 10);
        assert_eq!(envelope.seq, None);
        assert_eq!(envelope.event_type, None);
        assert_eq!(envelope.data.unwrap()["heartbeat_interval"], 41250);
    }

    #[test]
    fn test_null_sequence_parses_as_none() {
        let frame = Message::Text(r#"{"op":11,"s":null,"t":null,"d":null}"#.into());
        let envelope = decode(&frame).unwrap();
        assert_eq!(envelope.op, 11);
        assert_eq!(envelope.seq, None);
    }

    #[test]
    fn test_garbage_binary_frame_fails() {
        let frame = Message::Binary(vec![0xde, 0xad, 0xbe, 0xef].into());
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::Compression(_)) | Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_malformed_json_fails() {
        let frame = Message::Text("{not json".into());
        assert!(matches!(decode(&frame), Err(DecodeError::Json(_))));
    }
}
