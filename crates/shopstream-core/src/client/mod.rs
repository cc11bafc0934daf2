//! HTTP transport for the chat backend.
//!
//! The client only moves bytes: it posts the request, checks the status and
//! hands the body to [`FrameStream`]. Interpreting frames is up to the caller.

mod error;
mod types;

use std::time::Duration;

pub use error::{ClientError, ClientErrorKind, ClientResult};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::debug;
pub use types::{ChatRequest, FeedbackAck, FeedbackRequest};
use url::Url;

use crate::config::BackendConfig;
use crate::sse::{Frame, FrameStream};

/// Maximum number of characters of a request or response body logged at
/// debug level.
pub const PREVIEW_CHARS: usize = 2000;

const CHAT_STREAM_PATH: &str = "v1/chat/stream";
const FEEDBACK_PATH: &str = "v1/feedback";

/// Decoded frames of one chat turn.
pub type FrameResultStream = BoxStream<'static, ClientResult<Frame>>;

pub struct ChatClient {
    base_url: Url,
    timeout: Option<Duration>,
    http: reqwest::Client,
}

impl ChatClient {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &BackendConfig) -> ClientResult<Self> {
        let base_url = parse_base_url(&config.base_url)?;
        let timeout = config.timeout();

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(|e| {
            ClientError::new(
                ClientErrorKind::Network,
                format!("Failed to build HTTP client: {e}"),
            )
        })?;

        Ok(Self {
            base_url,
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Opens the event stream for one turn.
    ///
    /// The timeout only bounds connecting; a streaming response may run for
    /// as long as the backend keeps it open.
    ///
    /// # Errors
    /// Returns an error if the request fails or the backend answers with a
    /// non-success status.
    pub async fn stream_chat(&self, request: &ChatRequest) -> ClientResult<FrameResultStream> {
        let url = self.endpoint(CHAT_STREAM_PATH)?;
        log_request(&url, request);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = self
            .http
            .post(url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| error::classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = preview(&error_body), "chat stream rejected");
            return Err(ClientError::http_status(status.as_u16(), &error_body));
        }

        let byte_stream = Box::pin(response.bytes_stream());
        Ok(FrameStream::new(byte_stream).boxed())
    }

    /// Submits feedback for a completed turn.
    ///
    /// # Errors
    /// Returns an error if the request fails, the backend answers with a
    /// non-success status, or the acknowledgement is not valid JSON.
    pub async fn send_feedback(&self, request: &FeedbackRequest) -> ClientResult<FeedbackAck> {
        let url = self.endpoint(FEEDBACK_PATH)?;
        log_request(&url, request);

        let mut builder = self.http.post(url).json(request);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| error::classify_reqwest_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| error::classify_reqwest_error(&e))?;
        debug!(status = status.as_u16(), body = preview(&body), "feedback response");
        if !status.is_success() {
            return Err(ClientError::http_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| ClientError {
            kind: ClientErrorKind::Parse,
            message: format!("Invalid feedback response: {e}"),
            details: Some(body),
        })
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        self.base_url.join(path).map_err(|e| {
            ClientError::new(
                ClientErrorKind::Network,
                format!("Invalid endpoint {path}: {e}"),
            )
        })
    }
}

/// Parses the backend base URL, keeping any path prefix so that endpoint
/// paths are joined below it.
fn parse_base_url(raw: &str) -> ClientResult<Url> {
    let mut url = Url::parse(raw.trim()).map_err(|e| {
        ClientError::new(
            ClientErrorKind::Network,
            format!("Invalid backend URL '{raw}': {e}"),
        )
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn log_request<T: Serialize>(url: &Url, body: &T) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        let json = serde_json::to_string(body).unwrap_or_default();
        debug!(url = %url, body = preview(&json), "backend request");
    }
}

/// Truncates `text` to [`PREVIEW_CHARS`] characters.
pub fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
