use std::fmt;

use serde_json::Value;

/// Categories of transport errors for consistent handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Non-success HTTP status (4xx, 5xx)
    HttpStatus,
    /// Connection or request timeout
    Timeout,
    /// Connection refused, DNS failure, malformed request
    Network,
    /// The response body failed mid-stream
    Stream,
    /// A successful response carried a body that could not be parsed
    Parse,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErrorKind::HttpStatus => write!(f, "http_status"),
            ClientErrorKind::Timeout => write!(f, "timeout"),
            ClientErrorKind::Network => write!(f, "network"),
            ClientErrorKind::Stream => write!(f, "stream"),
            ClientErrorKind::Parse => write!(f, "parse"),
        }
    }
}

/// Structured transport error with kind and details.
#[derive(Debug, Clone)]
pub struct ClientError {
    /// Error category
    pub kind: ClientErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an HTTP status error, extracting a readable message from a
    /// JSON body (`{"error": ...}` or `{"detail": ...}`) when present.
    pub fn http_status(status: u16, body: &str) -> Self {
        let details = (!body.is_empty()).then(|| body.to_string());
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .as_ref()
            .and_then(extract_error_message)
            .map_or_else(
                || format!("HTTP {status}"),
                |msg| format!("HTTP {status}: {msg}"),
            );
        Self {
            kind: ClientErrorKind::HttpStatus,
            message,
            details,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Timeout, message)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ClientError {}

/// Result type for transport operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

fn extract_error_message(json: &Value) -> Option<String> {
    let field = json.get("error").or_else(|| json.get("detail"))?;
    match field {
        Value::String(msg) => Some(msg.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

pub(crate) fn classify_reqwest_error(e: &reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ClientError::new(ClientErrorKind::Network, format!("Connection failed: {e}"))
    } else if e.is_request() {
        ClientError::new(ClientErrorKind::Network, format!("Request error: {e}"))
    } else {
        ClientError::new(ClientErrorKind::Network, format!("Network error: {e}"))
    }
}
