use serde::{Deserialize, Serialize};

/// Body of `POST /v1/chat/stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub user_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_query: user_query.into(),
            client_message_id: None,
        }
    }

    #[must_use]
    pub fn with_client_message_id(mut self, id: impl Into<String>) -> Self {
        self.client_message_id = Some(id.into());
        self
    }
}

/// Body of `POST /v1/feedback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackRequest {
    pub session_id: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    pub selected_style_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Backend acknowledgement for a feedback submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeedbackAck {
    #[serde(default)]
    pub ok: bool,
}
