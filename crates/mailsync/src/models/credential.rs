//! Stored OAuth credential material

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which an access token is treated as stale
pub const EXPIRY_SKEW_SECS: i64 = 300;

/// OAuth token material persisted per account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// Cleared once the provider rejects the grant
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_true() -> bool {
    true
}

impl StoredToken {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            token_type: default_token_type(),
            expires_at: None,
            is_active: true,
            last_used: None,
        }
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Usable without a refresh. Tokens without an expiry are trusted until
    /// the API rejects them.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now + Duration::seconds(EXPIRY_SKEW_SECS),
            None => !self.access_token.is_empty(),
        }
    }
}
