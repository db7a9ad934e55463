//! Gmail OAuth2 token sources
//!
//! [`RefreshingTokenSource`] keeps an access token fresh against Google's
//! token endpoint. [`PersistingTokenSource`] decorates any source: it writes
//! rotated token material back to the credential store and flags the
//! credential inactive once Google rejects the grant.
//! Uses synchronous HTTP (ureq) to be executor-agnostic. A refresh is
//! bound to the sync's [`CancelScope`] like every other request.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, warn};
use serde::Deserialize;

use crate::cancel::CancelScope;
use crate::config::GmailCredentials;
use crate::models::StoredToken;
use crate::storage::CredentialStore;

/// Error raised while obtaining an access token
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Google rejected the refresh token; only a new consent fixes this.
    #[error("refresh token rejected (invalid_grant): {0}")]
    InvalidGrant(String),

    #[error("access token expired and no refresh token is stored")]
    MissingRefreshToken,

    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token refresh cancelled")]
    Cancelled,
}

impl AuthError {
    /// Errors that no amount of retrying will fix
    pub fn is_permanent(&self) -> bool {
        matches!(self, AuthError::InvalidGrant(_) | AuthError::MissingRefreshToken)
    }
}

/// Supplies a currently valid access token
///
/// Called before every API request so rotation mid-sync is picked up.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<StoredToken, AuthError>;
}

impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn token(&self) -> Result<StoredToken, AuthError> {
        (**self).token()
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// OAuth error body from Google
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Refreshes the access token when it is about to expire
pub struct RefreshingTokenSource {
    credentials: GmailCredentials,
    current: Mutex<StoredToken>,
    agent: ureq::Agent,
    token_url: String,
    scope: Arc<CancelScope>,
    request_timeout: Duration,
}

impl RefreshingTokenSource {
    /// Google's OAuth2 token endpoint
    pub const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Refreshes give up once `scope` ends and never outlast its deadline
    pub fn new(
        credentials: GmailCredentials,
        token: StoredToken,
        scope: Arc<CancelScope>,
        request_timeout: Duration,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            credentials,
            current: Mutex::new(token),
            agent,
            token_url: Self::TOKEN_URL.to_string(),
            scope,
            request_timeout,
        }
    }

    /// Point at a different token endpoint
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let timeout = self
            .scope
            .clamp(self.request_timeout)
            .ok_or(AuthError::Cancelled)?;

        let result = self
            .agent
            .post(&self.token_url)
            .config()
            .timeout_global(Some(timeout))
            .build()
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ]);
        let mut response = match result {
            Ok(response) => response,
            Err(_) if self.scope.is_cancelled() => return Err(AuthError::Cancelled),
            Err(e) => return Err(AuthError::Transport(e.to_string())),
        };

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(classify_token_error(status, body));
        }

        response
            .body_mut()
            .read_json()
            .map_err(|e| AuthError::Transport(format!("invalid token response: {}", e)))
    }
}

fn classify_token_error(status: u16, body: String) -> AuthError {
    match serde_json::from_str::<OAuthErrorBody>(&body) {
        Ok(parsed) if parsed.error == "invalid_grant" => {
            AuthError::InvalidGrant(parsed.error_description.unwrap_or(parsed.error))
        }
        _ if body.contains("invalid_grant") => AuthError::InvalidGrant(body),
        _ => AuthError::TokenEndpoint { status, body },
    }
}

impl TokenSource for RefreshingTokenSource {
    fn token(&self) -> Result<StoredToken, AuthError> {
        // Held across the refresh so concurrent workers refresh once
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        if current.is_fresh(now) {
            return Ok(current.clone());
        }
        if self.scope.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;

        debug!("Refreshing access token");
        let response = self.refresh_access_token(&refresh_token)?;

        current.access_token = response.access_token;
        if let Some(token_type) = response.token_type {
            current.token_type = token_type;
        }
        current.expires_at = response
            .expires_in
            .map(|secs| now + chrono::Duration::seconds(secs));
        // Preserve the refresh token if not returned
        if response.refresh_token.is_some() {
            current.refresh_token = response.refresh_token;
        }

        Ok(current.clone())
    }
}

/// Decorator that persists rotated tokens and deactivates rejected ones
pub struct PersistingTokenSource<S> {
    inner: S,
    account_id: String,
    store: Arc<dyn CredentialStore>,
    last_access_token: Mutex<String>,
}

impl<S: TokenSource> PersistingTokenSource<S> {
    /// `initial` is the token as loaded from the store
    pub fn new(
        inner: S,
        account_id: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        initial: &StoredToken,
    ) -> Self {
        Self {
            inner,
            account_id: account_id.into(),
            store,
            last_access_token: Mutex::new(initial.access_token.clone()),
        }
    }
}

impl<S: TokenSource> TokenSource for PersistingTokenSource<S> {
    fn token(&self) -> Result<StoredToken, AuthError> {
        let mut token = match self.inner.token() {
            Ok(token) => token,
            Err(e) if e.is_permanent() => {
                warn!(
                    "Credential for {} rejected, marking inactive: {}",
                    self.account_id, e
                );
                if let Err(store_err) = self.store.mark_credential_inactive(&self.account_id) {
                    error!(
                        "Failed to mark credential for {} inactive: {:#}",
                        self.account_id, store_err
                    );
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let mut last = self
            .last_access_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if token.access_token != *last {
            token.last_used = Some(Utc::now());
            match self.store.save_credential(&self.account_id, &token) {
                Ok(()) => {
                    debug!("Saved refreshed token for {}", self.account_id);
                    *last = token.access_token.clone();
                }
                // Still usable for this run; the next call tries the save again
                Err(e) => error!(
                    "Failed to save refreshed token for {}: {:#}",
                    self.account_id, e
                ),
            }
        }

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryMailStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out a scripted sequence of results
    struct ScriptedSource {
        results: Mutex<Vec<Result<StoredToken, AuthError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(mut results: Vec<Result<StoredToken, AuthError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TokenSource for ScriptedSource {
        fn token(&self) -> Result<StoredToken, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.lock().unwrap().pop().expect("script exhausted")
        }
    }

    /// Credential store whose first `failing` saves error out
    struct FlakyCredentials {
        inner: InMemoryMailStore,
        failing: AtomicUsize,
    }

    impl CredentialStore for FlakyCredentials {
        fn load_credential(&self, account_id: &str) -> anyhow::Result<Option<StoredToken>> {
            self.inner.load_credential(account_id)
        }

        fn save_credential(&self, account_id: &str, token: &StoredToken) -> anyhow::Result<()> {
            if self
                .failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("database is locked");
            }
            self.inner.save_credential(account_id, token)
        }

        fn mark_credential_inactive(&self, account_id: &str) -> anyhow::Result<()> {
            self.inner.mark_credential_inactive(account_id)
        }
    }

    fn creds() -> GmailCredentials {
        GmailCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
        }
    }

    fn open_scope() -> Arc<CancelScope> {
        Arc::new(CancelScope::with_timeout(Duration::from_secs(60)))
    }

    fn setup(initial: &StoredToken) -> Arc<InMemoryMailStore> {
        let store = Arc::new(InMemoryMailStore::new());
        store.save_credential("acct", initial).unwrap();
        store
    }

    #[test]
    fn test_unchanged_token_is_not_saved() {
        let initial = StoredToken::new("a1", Some("r1".into()));
        let store = setup(&initial);
        let source = PersistingTokenSource::new(
            ScriptedSource::new(vec![Ok(initial.clone())]),
            "acct",
            store.clone(),
            &initial,
        );

        let token = source.token().unwrap();
        assert_eq!(token.access_token, "a1");
        assert_eq!(store.load_credential("acct").unwrap().unwrap().last_used, None);
    }

    #[test]
    fn test_rotated_token_is_persisted() {
        let initial = StoredToken::new("a1", Some("r1".into()));
        let store = setup(&initial);
        let rotated = StoredToken::new("a2", Some("r2".into()));
        let source = PersistingTokenSource::new(
            ScriptedSource::new(vec![Ok(rotated.clone()), Ok(rotated)]),
            "acct",
            store.clone(),
            &initial,
        );

        assert_eq!(source.token().unwrap().access_token, "a2");
        let saved = store.load_credential("acct").unwrap().unwrap();
        assert_eq!(saved.access_token, "a2");
        assert_eq!(saved.refresh_token.as_deref(), Some("r2"));
        assert!(saved.last_used.is_some());

        // Second call with the same token does not write again
        store
            .save_credential("acct", &StoredToken::new("marker", None))
            .unwrap();
        source.token().unwrap();
        assert_eq!(
            store.load_credential("acct").unwrap().unwrap().access_token,
            "marker"
        );
    }

    #[test]
    fn test_failed_save_is_retried_on_next_call() {
        let initial = StoredToken::new("a1", Some("r1".into()));
        let store = Arc::new(FlakyCredentials {
            inner: InMemoryMailStore::new(),
            failing: AtomicUsize::new(1),
        });
        store.inner.save_credential("acct", &initial).unwrap();
        let rotated = StoredToken::new("a2", Some("r2".into()));
        let source = PersistingTokenSource::new(
            ScriptedSource::new(vec![Ok(rotated.clone()), Ok(rotated)]),
            "acct",
            store.clone(),
            &initial,
        );

        // First save fails but the rotated token is still handed out
        assert_eq!(source.token().unwrap().access_token, "a2");
        assert_eq!(store.load_credential("acct").unwrap().unwrap().access_token, "a1");

        source.token().unwrap();
        let saved = store.load_credential("acct").unwrap().unwrap();
        assert_eq!(saved.access_token, "a2");
        assert_eq!(saved.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn test_invalid_grant_marks_inactive() {
        let initial = StoredToken::new("a1", Some("r1".into()));
        let store = setup(&initial);
        let source = PersistingTokenSource::new(
            ScriptedSource::new(vec![Err(AuthError::InvalidGrant("revoked".into()))]),
            "acct",
            store.clone(),
            &initial,
        );

        let err = source.token().unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant(_)));
        assert!(!store.load_credential("acct").unwrap().unwrap().is_active);
    }

    #[test]
    fn test_transient_error_keeps_credential_active() {
        let initial = StoredToken::new("a1", Some("r1".into()));
        let store = setup(&initial);
        let source = PersistingTokenSource::new(
            ScriptedSource::new(vec![Err(AuthError::Transport("timeout".into()))]),
            "acct",
            store.clone(),
            &initial,
        );

        assert!(source.token().is_err());
        assert!(store.load_credential("acct").unwrap().unwrap().is_active);
    }

    #[test]
    fn test_fresh_token_skips_refresh() {
        let token = StoredToken::new("a1", Some("r1".into()))
            .expires_at(Utc::now() + chrono::Duration::hours(1));
        // Unroutable endpoint: any refresh attempt would fail
        let source =
            RefreshingTokenSource::new(creds(), token, open_scope(), Duration::from_millis(50))
                .with_token_url("http://127.0.0.1:9/token");

        assert_eq!(source.token().unwrap().access_token, "a1");
    }

    #[test]
    fn test_refresh_stops_with_cancelled_scope() {
        let token = StoredToken::new("a1", Some("r1".into())).expires_at(Utc::now());
        let scope = open_scope();
        scope.cancel();
        let source =
            RefreshingTokenSource::new(creds(), token, scope, Duration::from_secs(60))
                .with_token_url("http://127.0.0.1:9/token");

        let err = source.token().unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_refresh_timeout_capped_by_deadline() {
        let token = StoredToken::new("a1", Some("r1".into())).expires_at(Utc::now());
        let scope = Arc::new(CancelScope::with_timeout(Duration::from_millis(50)));
        // Accepts the connection but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());
        let source =
            RefreshingTokenSource::new(creds(), token, scope, Duration::from_secs(60))
                .with_token_url(url);

        let started = std::time::Instant::now();
        let err = source.token().unwrap_err();
        assert!(matches!(err, AuthError::Cancelled), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
        drop(listener);
    }

    #[test]
    fn test_expired_token_without_refresh_token() {
        let token = StoredToken::new("a1", None).expires_at(Utc::now());
        let source = RefreshingTokenSource::new(creds(), token, open_scope(), Duration::from_millis(50));

        let err = source.token().unwrap_err();
        assert!(matches!(err, AuthError::MissingRefreshToken));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_classify_token_error() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#;
        match classify_token_error(400, body.to_string()) {
            AuthError::InvalidGrant(desc) => assert_eq!(desc, "Token has been expired or revoked."),
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            classify_token_error(500, "oops".to_string()),
            AuthError::TokenEndpoint { status: 500, .. }
        ));
    }
}
