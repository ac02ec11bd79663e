//! Wire types for the Twilio Media Streams WebSocket protocol.
//!
//! Inbound frames are JSON objects discriminated by an `event` field with
//! camelCase payload keys. Outbound frames are the `media` and `mark` events
//! the bridge sends back over the same socket.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

/// Inbound message from the telephony side, discriminated by `event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyMessage {
    /// Handshake frame sent once after the socket opens.
    Connected {
        protocol: Option<String>,
        version: Option<String>,
    },
    /// Stream metadata; opens the call.
    #[serde(rename_all = "camelCase")]
    Start {
        sequence_number: Option<String>,
        stream_sid: Option<String>,
        start: Option<StartPayload>,
    },
    /// One chunk of caller audio.
    #[serde(rename_all = "camelCase")]
    Media {
        sequence_number: Option<String>,
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    /// End of the stream.
    #[serde(rename_all = "camelCase")]
    Stop {
        sequence_number: Option<String>,
        stream_sid: Option<String>,
        stop: Option<StopPayload>,
    },
    /// Acknowledgement of a mark the bridge sent earlier.
    #[serde(rename_all = "camelCase")]
    Mark {
        stream_sid: Option<String>,
        mark: MarkPayload,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub account_sid: Option<String>,
    pub call_sid: Option<String>,
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    /// Base64-encoded audio bytes
    pub payload: String,
    pub track: Option<String>,
    pub chunk: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPayload {
    pub account_sid: Option<String>,
    pub call_sid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Outbound `media` frame carrying one fixed-size audio frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMediaFrame {
    pub event: String,
    pub sequence_number: String,
    pub media: OutboundMediaPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMediaPayload {
    pub payload: String,
}

impl OutboundMediaFrame {
    pub fn new(sequence_number: u64, payload: String) -> Self {
        Self {
            event: "media".to_string(),
            sequence_number: sequence_number.to_string(),
            media: OutboundMediaPayload { payload },
        }
    }
}

/// Outbound `mark` frame delimiting the end of a synthesized utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMarkFrame {
    pub event: String,
    pub mark: MarkPayload,
}

impl OutboundMarkFrame {
    pub fn new(name: String) -> Self {
        Self {
            event: "mark".to_string(),
            mark: MarkPayload { name },
        }
    }
}

/// Routing envelope between a connection's tasks and its sender task.
#[derive(Debug)]
pub enum MessageRoute {
    /// Deliver a message to the telephony peer.
    Outgoing(Message),
    /// Close the socket and stop the sender task.
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_start() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ0123456789abcdef0123456789abcdef",
            "start": {
                "accountSid": "AC0123456789abcdef0123456789abcdef",
                "callSid": "CA0123456789abcdef0123456789abcdef",
                "streamSid": "MZ0123456789abcdef0123456789abcdef",
                "tracks": ["inbound"]
            }
        }"#;
        let msg: TelephonyMessage = serde_json::from_str(json).unwrap();
        match msg {
            TelephonyMessage::Start {
                stream_sid, start, ..
            } => {
                assert_eq!(
                    stream_sid.as_deref(),
                    Some("MZ0123456789abcdef0123456789abcdef")
                );
                let start = start.unwrap();
                assert_eq!(
                    start.call_sid.as_deref(),
                    Some("CA0123456789abcdef0123456789abcdef")
                );
                assert_eq!(start.tracks, vec!["inbound"]);
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_media() {
        let json = r#"{
            "event": "media",
            "sequenceNumber": "3",
            "media": { "track": "inbound", "chunk": "2", "timestamp": "40", "payload": "AAAA" }
        }"#;
        let msg: TelephonyMessage = serde_json::from_str(json).unwrap();
        match msg {
            TelephonyMessage::Media { media, .. } => {
                assert_eq!(media.payload, "AAAA");
                assert_eq!(media.track.as_deref(), Some("inbound"));
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_stop_and_mark() {
        let stop: TelephonyMessage =
            serde_json::from_str(r#"{ "event": "stop", "stop": { "callSid": "CAx" } }"#).unwrap();
        assert!(matches!(stop, TelephonyMessage::Stop { .. }));

        let mark: TelephonyMessage =
            serde_json::from_str(r#"{ "event": "mark", "mark": { "name": "done" } }"#).unwrap();
        match mark {
            TelephonyMessage::Mark { mark, .. } => assert_eq!(mark.name, "done"),
            other => panic!("expected mark, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_unknown_event_fails() {
        let result: Result<TelephonyMessage, _> =
            serde_json::from_str(r#"{ "event": "dtmf", "dtmf": { "digit": "1" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_outbound_media() {
        let frame = OutboundMediaFrame::new(7, "cGF5bG9hZA==".to_string());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["sequenceNumber"], "7");
        assert_eq!(json["media"]["payload"], "cGF5bG9hZA==");
    }

    #[test]
    fn test_serialize_outbound_mark() {
        let frame = OutboundMarkFrame::new("bedrock_out_1234".to_string());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "mark");
        assert_eq!(json["mark"]["name"], "bedrock_out_1234");
    }
}
