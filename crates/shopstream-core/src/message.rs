//! Typed messages decoded from stream frames.
//!
//! Conversion is total: payload fields that are missing or have an unexpected
//! shape fall back to defaults instead of failing.

use std::num::FpCategory;

use serde_json::Value;

use crate::sse::{Frame, payload_text};

/// One recognized (or unrecognized) message from the chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A turn started on the backend; carries the correlation id.
    Start {
        message_id: Option<String>,
        session_id: Option<String>,
    },
    /// A backend processing node reported progress.
    State {
        node: String,
        update_keys: Vec<String>,
    },
    /// Incremental answer text.
    Token { delta: String },
    /// Terminal structured result.
    Final(Value),
    /// Terminal failure reported by the backend (or synthesized by the caller).
    Error {
        error: Option<String>,
        error_type: Option<String>,
    },
    /// End of turn.
    Done,
    /// Any other event name; ignored by the reducer.
    Unknown { event: Option<String> },
}

impl Message {
    /// Builds the synthetic error used when the transport fails.
    pub fn transport_failure(text: impl Into<String>) -> Self {
        Message::Error {
            error: Some(text.into()),
            error_type: Some("transport".to_string()),
        }
    }

    /// Returns true for `final`, `error`, and `done`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Message::Final(_) | Message::Error { .. } | Message::Done
        )
    }

    /// Returns the protocol event name for this message.
    pub fn kind(&self) -> &str {
        match self {
            Message::Start { .. } => "start",
            Message::State { .. } => "state",
            Message::Token { .. } => "token",
            Message::Final(_) => "final",
            Message::Error { .. } => "error",
            Message::Done => "done",
            Message::Unknown { event } => event.as_deref().unwrap_or(""),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        let data = frame.data.unwrap_or(Value::Null);
        match frame.event.as_deref() {
            Some("start") => Message::Start {
                message_id: string_field(&data, "message_id"),
                session_id: string_field(&data, "session_id"),
            },
            Some("state") => Message::State {
                node: text_field(&data, "node"),
                update_keys: string_list(&data, "update_keys"),
            },
            Some("token") => Message::Token {
                delta: text_field(&data, "delta"),
            },
            Some("final") => Message::Final(data),
            Some("error") => Message::Error {
                error: error_text(&data),
                error_type: string_field(&data, "error_type"),
            },
            Some("done") => Message::Done,
            _ => Message::Unknown { event: frame.event },
        }
    }
}

/// Reads a field that must be a string; anything else is absent.
fn string_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Reads a field as display text; scalars render as JSON, missing is empty.
fn text_field(data: &Value, key: &str) -> String {
    data.get(key)
        .map(|value| payload_text(value).into_owned())
        .unwrap_or_default()
}

/// Reads the error description; falsy values (`false`, `0`, `""`, `null`)
/// count as absent.
fn error_text(data: &Value) -> Option<String> {
    match data.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::Number(n) if n.as_f64().map(f64::classify) == Some(FpCategory::Zero) => None,
        value => Some(payload_text(value).into_owned()).filter(|text| !text.is_empty()),
    }
}

fn string_list(data: &Value, key: &str) -> Vec<String> {
    match data.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frame(event: &str, data: Value) -> Frame {
        Frame {
            id: None,
            event: Some(event.to_string()),
            data: Some(data),
        }
    }

    #[test]
    fn test_start_reads_correlation_id() {
        let msg = Message::from(frame("start", json!({"message_id": "m1", "session_id": "s1"})));
        assert_eq!(
            msg,
            Message::Start {
                message_id: Some("m1".into()),
                session_id: Some("s1".into()),
            }
        );
    }

    #[test]
    fn test_start_with_non_string_id_records_nothing() {
        let msg = Message::from(frame("start", json!({"message_id": 17})));
        assert!(matches!(msg, Message::Start { message_id: None, .. }));
    }

    #[test]
    fn test_state_defaults_missing_fields() {
        let msg = Message::from(frame("state", json!({})));
        assert_eq!(
            msg,
            Message::State {
                node: String::new(),
                update_keys: vec![],
            }
        );
    }

    #[test]
    fn test_state_skips_non_string_keys() {
        let msg = Message::from(frame(
            "state",
            json!({"node": "fusion_agent", "update_keys": ["api_response", 3, null, "fused"]}),
        ));
        assert_eq!(
            msg,
            Message::State {
                node: "fusion_agent".into(),
                update_keys: vec!["api_response".into(), "fused".into()],
            }
        );
    }

    #[test]
    fn test_token_coerces_scalar_delta() {
        assert_eq!(
            Message::from(frame("token", json!({"delta": 42}))),
            Message::Token { delta: "42".into() }
        );
        assert_eq!(
            Message::from(frame("token", json!({"delta": null}))),
            Message::Token {
                delta: String::new()
            }
        );
    }

    #[test]
    fn test_token_with_raw_text_payload_has_empty_delta() {
        let msg = Message::from(frame("token", Value::String("not-json".into())));
        assert_eq!(
            msg,
            Message::Token {
                delta: String::new()
            }
        );
    }

    #[test]
    fn test_final_without_data_is_null() {
        let msg = Message::from(Frame {
            event: Some("final".into()),
            ..Frame::default()
        });
        assert_eq!(msg, Message::Final(Value::Null));
        assert!(msg.is_terminal());
    }

    #[test]
    fn test_error_empty_text_counts_as_absent() {
        let msg = Message::from(frame("error", json!({"error": ""})));
        assert!(matches!(msg, Message::Error { error: None, .. }));

        let msg = Message::from(frame(
            "error",
            json!({"error": "boom", "error_type": "ValueError"}),
        ));
        assert_eq!(
            msg,
            Message::Error {
                error: Some("boom".into()),
                error_type: Some("ValueError".into()),
            }
        );
    }

    #[test]
    fn test_error_falsy_scalars_count_as_absent() {
        for value in [json!(false), json!(0), json!(0.0), json!(null)] {
            let msg = Message::from(frame("error", json!({ "error": value })));
            assert!(
                matches!(msg, Message::Error { error: None, .. }),
                "error {value}"
            );
        }

        let msg = Message::from(frame("error", json!({"error": 503})));
        assert!(matches!(msg, Message::Error { error: Some(ref text), .. } if text == "503"));
        let msg = Message::from(frame("error", json!({"error": true})));
        assert!(matches!(msg, Message::Error { error: Some(ref text), .. } if text == "true"));
    }

    #[test]
    fn test_unknown_event_kinds() {
        let msg = Message::from(frame("heartbeat", json!({})));
        assert_eq!(msg.kind(), "heartbeat");
        assert!(!msg.is_terminal());

        let msg = Message::from(Frame::default());
        assert_eq!(msg, Message::Unknown { event: None });
    }

    #[test]
    fn test_transport_failure_is_terminal_error() {
        let msg = Message::transport_failure("connection refused");
        assert!(msg.is_terminal());
        assert_eq!(msg.kind(), "error");
    }
}
