//! Gmail API error classification

use std::time::Duration;

use super::AuthError;

/// Quota reasons Gmail reports in 403 bodies
const RATE_LIMIT_MARKERS: &[&str] = &[
    "ratelimitexceeded",
    "userratelimitexceeded",
    "quotaexceeded",
    "rate limit",
    "quota exceeded",
];

/// Error returned by a Gmail API call
#[derive(Debug, thiserror::Error)]
pub enum GmailError {
    #[error("rate limited by Gmail (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// History id too old or unknown to the server
    #[error("history id {cursor} expired or invalid")]
    HistoryExpired { cursor: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Gmail API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,
}

impl GmailError {
    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        if status == 429 || (status == 403 && is_rate_limit_body(&body)) {
            return GmailError::RateLimited { retry_after };
        }
        if status == 404 {
            return GmailError::NotFound(body);
        }
        GmailError::Api { status, body }
    }

    /// Worth retrying the same request after a short backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            GmailError::Transport(_) => true,
            GmailError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn is_rate_limit_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether a history response says the start id is unknown
pub(crate) fn is_history_not_found(status: u16, body: &str) -> bool {
    let lower = body.to_lowercase();
    status == 404 || lower.contains("historyidnotfound") || lower.contains("history id not found")
}
