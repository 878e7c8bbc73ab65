//! Error types for the streaming agent

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the agent
///
/// Most of these never reach the host application: per-record decode failures are
/// dropped inside the frame decoder, tool failures become `ok: false` outcomes and
/// transport failures become an assistant turn explaining what happened. Only
/// [`Error::Busy`] and [`Error::Config`] are returned from
/// [`Client::submit`](crate::Client::submit).
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (connection refused, DNS, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the chat or search endpoint
    #[error("{status}{}", body_suffix(.body))]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Streaming transport failed after the response started
    #[error("Streaming error: {0}")]
    Stream(String),

    /// A single stream record could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Tool call arguments missing or invalid
    #[error("Invalid tool arguments: {0}")]
    ToolArguments(String),

    /// The in-flight request was canceled by the user
    #[error("Request canceled")]
    Cancelled,

    /// A cycle is already running
    #[error("Agent is busy with another request")]
    Busy,
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API status error
    pub fn api(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Error::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Create a new tool argument error
    pub fn tool_arguments(msg: impl Into<String>) -> Self {
        Error::ToolArguments(msg.into())
    }

    /// True for the user-initiated cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
