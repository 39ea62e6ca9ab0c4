use thiserror::Error;

/// Error taxonomy surfaced above the gateway/stream boundary.
///
/// Transport failures are converted here before they reach callers; UI code
/// reacts to these coarse kinds, never to raw `reqwest` errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the request even after a refresh-and-retry cycle.
    #[error("request rejected by server")]
    Unauthorized,

    /// The refresh call itself failed; credentials have been cleared and a
    /// session-ended event has fired.
    #[error("session expired; sign in again")]
    SessionExpired,

    /// Transport failure on an open event stream. The affected turn is marked
    /// failed; the turn is not retried automatically.
    #[error("stream failed: {0}")]
    Stream(String),

    /// Malformed local input, rejected before any network call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Non-auth HTTP error, surfaced unchanged.
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
