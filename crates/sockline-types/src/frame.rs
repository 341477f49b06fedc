//! Wire frames exchanged between a chat client and its peer.
//!
//! One JSON object per WebSocket text message, internally tagged so either
//! side can dispatch on `type` without trial deserialization.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Publish a chat message to the channel.
    Publish { id: Uuid, body: String },
    /// Keepalive probe; the peer echoes the nonce back.
    Ping { nonce: u64 },
    /// Orderly shutdown notice.
    Close { code: u16, reason: String },
}

/// Frames sent by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Receipt for a publish. `seq` is the peer's arrival-order sequence
    /// number, strictly increasing for the lifetime of the peer.
    Delivered { id: Uuid, seq: u64 },
    /// A message fanned out to the channel, the sender's own included.
    Message { seq: u64, body: String },
    /// Echo of a ping.
    Pong { nonce: u64 },
    /// Peer-side failure notice.
    Error { code: String, message: String },
    /// Peer confirms shutdown.
    Closed { code: u16, reason: String },
}

#[cfg(test)]
mod serialization_tests {
    use super::*;

    #[test]
    fn test_publish_serialization() {
        let frame = ClientFrame::Publish {
            id: Uuid::nil(),
            body: "hello channel".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"publish""#));
        assert!(json.contains(r#""body":"hello channel""#));
    }

    #[test]
    fn test_ping_serialization() {
        let frame = ClientFrame::Ping { nonce: 7 };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"ping""#));
        assert!(json.contains(r#""nonce":7"#));
    }

    #[test]
    fn test_delivered_serialization() {
        let frame = ServerFrame::Delivered {
            id: Uuid::nil(),
            seq: 42,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"delivered""#));
        assert!(json.contains(r#""seq":42"#));
    }

    #[test]
    fn test_message_serialization() {
        let frame = ServerFrame::Message {
            seq: 3,
            body: "fan out".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"message""#));
        assert!(json.contains(r#""seq":3"#));
    }

    #[test]
    fn test_error_serialization() {
        let frame = ServerFrame::Error {
            code: "capacity".to_string(),
            message: "relay full".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""code":"capacity""#));
    }

    #[test]
    fn test_client_frame_roundtrip() {
        let id = Uuid::new_v4();
        let original = ClientFrame::Publish {
            id,
            body: "roundtrip".to_string(),
        };
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();

        match parsed {
            ClientFrame::Publish {
                id: parsed_id,
                body,
            } => {
                assert_eq!(parsed_id, id);
                assert_eq!(body, "roundtrip");
            }
            _ => panic!("Expected Publish"),
        }
    }

    #[test]
    fn test_server_frame_roundtrip() {
        let original = ServerFrame::Closed {
            code: 1000,
            reason: "bye".to_string(),
        };
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();

        match parsed {
            ServerFrame::Closed { code, reason } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "bye");
            }
            _ => panic!("Expected Closed"),
        }
    }

    #[test]
    fn test_all_frames_have_snake_case_type() {
        let client_frames: Vec<(&str, ClientFrame)> = vec![
            (
                "publish",
                ClientFrame::Publish {
                    id: Uuid::nil(),
                    body: String::new(),
                },
            ),
            ("ping", ClientFrame::Ping { nonce: 0 }),
            (
                "close",
                ClientFrame::Close {
                    code: 1000,
                    reason: String::new(),
                },
            ),
        ];
        for (tag, frame) in client_frames {
            let json = serde_json::to_string(&frame).unwrap();
            assert!(
                json.contains(&format!(r#""type":"{tag}""#)),
                "missing tag {tag} in {json}"
            );
        }

        let server_frames: Vec<(&str, ServerFrame)> = vec![
            (
                "delivered",
                ServerFrame::Delivered {
                    id: Uuid::nil(),
                    seq: 0,
                },
            ),
            (
                "message",
                ServerFrame::Message {
                    seq: 0,
                    body: String::new(),
                },
            ),
            ("pong", ServerFrame::Pong { nonce: 0 }),
            (
                "error",
                ServerFrame::Error {
                    code: String::new(),
                    message: String::new(),
                },
            ),
            (
                "closed",
                ServerFrame::Closed {
                    code: 1000,
                    reason: String::new(),
                },
            ),
        ];
        for (tag, frame) in server_frames {
            let json = serde_json::to_string(&frame).unwrap();
            assert!(
                json.contains(&format!(r#""type":"{tag}""#)),
                "missing tag {tag} in {json}"
            );
        }
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let result: Result<ClientFrame, _> =
            serde_json::from_str(r#"{"type":"subscribe","channel":"general"}"#);
        assert!(result.is_err());
    }
}
