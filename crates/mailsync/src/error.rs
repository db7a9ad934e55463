//! Error taxonomy for the sync engine
//!
//! Storage and plumbing code returns `anyhow::Result`; anything that crosses
//! the `SyncEngine` boundary is classified into a [`SyncError`] so callers can
//! decide between retrying, prompting for re-authorization, or giving up.

use std::time::Duration;

use crate::gmail::{AuthError, GmailError};

/// Why a cursor could not be reconstructed from local data
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("no messages found for account {account_id}")]
    NoMessagesFound { account_id: String },

    #[error("latest message {message_id} has no usable history_id in its metadata")]
    MetadataMissing { message_id: String },

    #[error("failed to read local messages: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Error returned by a sync attempt
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The credential is flagged inactive; the account needs re-authorization.
    #[error("credential for account {account_id} is inactive")]
    CredentialInactive { account_id: String },

    /// The provider permanently rejected the credential.
    #[error("credential rejected: {reason}")]
    CredentialInvalid { reason: String },

    #[error("rate limited by remote API")]
    RateLimited { retry_after: Option<Duration> },

    /// The stored cursor is too old or unparsable; a full sync is required.
    #[error("sync cursor {cursor:?} expired or invalid")]
    CursorExpired { cursor: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("remote object not found: {0}")]
    NotFound(String),

    #[error("malformed message {message_id}: {reason}")]
    Malformed { message_id: String, reason: String },

    #[error("cursor recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("sync cancelled or deadline exceeded")]
    Cancelled,

    #[error("account {account_id} has no sync state; link it first")]
    NotLinked { account_id: String },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// Credential errors deactivate the account and are never retried.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            SyncError::CredentialInactive { .. } | SyncError::CredentialInvalid { .. }
        )
    }

    /// Errors that abort the whole attempt instead of counting as a single
    /// failed message.
    pub fn is_fatal(&self) -> bool {
        self.is_credential_error()
            || matches!(self, SyncError::RateLimited { .. } | SyncError::Cancelled)
    }

    /// Per-message failures that retrying the same message cannot fix
    pub fn is_permanent(&self) -> bool {
        matches!(self, SyncError::Malformed { .. })
    }

    /// Whether an incremental failure may fall back to a full sync
    pub fn allows_fallback(&self) -> bool {
        !self.is_fatal() && !matches!(self, SyncError::Recovery(_))
    }

    /// Ordering used to pick the error surfaced from a batch of failures.
    pub(crate) fn severity(&self) -> u8 {
        match self {
            SyncError::CredentialInactive { .. } | SyncError::CredentialInvalid { .. } => 6,
            SyncError::RateLimited { .. } => 5,
            SyncError::Storage(_) => 4,
            SyncError::Cancelled => 3,
            SyncError::Network(_) | SyncError::CursorExpired { .. } => 2,
            SyncError::Recovery(_) | SyncError::NotLinked { .. } => 1,
            SyncError::NotFound(_) | SyncError::Malformed { .. } => 0,
        }
    }
}

impl From<GmailError> for SyncError {
    fn from(err: GmailError) -> Self {
        match err {
            GmailError::RateLimited { retry_after } => SyncError::RateLimited { retry_after },
            GmailError::HistoryExpired { cursor } => SyncError::CursorExpired { cursor },
            GmailError::NotFound(what) => SyncError::NotFound(what),
            GmailError::Auth(auth) if auth.is_permanent() => SyncError::CredentialInvalid {
                reason: auth.to_string(),
            },
            GmailError::Cancelled | GmailError::Auth(AuthError::Cancelled) => SyncError::Cancelled,
            other => SyncError::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gmail_error_classification() {
        let err: SyncError = GmailError::RateLimited { retry_after: None }.into();
        assert!(matches!(err, SyncError::RateLimited { .. }));
        assert!(err.is_fatal());
        assert!(!err.allows_fallback());

        let err: SyncError = GmailError::HistoryExpired {
            cursor: "42".to_string(),
        }
        .into();
        assert!(matches!(err, SyncError::CursorExpired { .. }));
        assert!(err.allows_fallback());

        let err: SyncError = GmailError::Auth(AuthError::InvalidGrant("revoked".into())).into();
        assert!(err.is_credential_error());

        // A refresh cut short by the deadline stops the run like any request
        let err: SyncError = GmailError::Auth(AuthError::Cancelled).into();
        assert!(matches!(err, SyncError::Cancelled));

        let err: SyncError = GmailError::Api {
            status: 500,
            body: "backend error".to_string(),
        }
        .into();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(err.allows_fallback());
    }

    #[test]
    fn test_only_malformed_is_permanent() {
        let malformed = SyncError::Malformed {
            message_id: "m1".to_string(),
            reason: "missing payload".to_string(),
        };
        assert!(malformed.is_permanent());
        assert!(!malformed.is_fatal());
        assert!(!SyncError::Network("reset".to_string()).is_permanent());
    }

    #[test]
    fn test_recovery_failure_does_not_fall_back() {
        let err = SyncError::Recovery(RecoveryError::NoMessagesFound {
            account_id: "a".to_string(),
        });
        assert!(!err.is_fatal());
        assert!(!err.allows_fallback());
    }

    #[test]
    fn test_severity_prefers_credential_errors() {
        let credential = SyncError::CredentialInvalid {
            reason: "invalid_grant".to_string(),
        };
        let rate = SyncError::RateLimited { retry_after: None };
        assert!(credential.severity() > rate.severity());
        assert!(rate.severity() > SyncError::Cancelled.severity());
    }
}
