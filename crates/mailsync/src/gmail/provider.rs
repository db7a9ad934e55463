//! Client factory handing the sync engine an authorized remote client

use std::sync::Arc;
use std::time::Duration;

use super::{GmailClient, PersistingTokenSource, RefreshingTokenSource, RemoteMailClient};
use crate::cancel::CancelScope;
use crate::config::GmailCredentials;
use crate::error::SyncError;
use crate::storage::CredentialStore;

/// Produces a [`RemoteMailClient`] for an account
///
/// The client is bound to `scope`: every request it makes, including token
/// refreshes, stops when the scope is cancelled or its deadline passes.
pub trait TokenProvider: Send + Sync {
    fn client(
        &self,
        account_id: &str,
        scope: &Arc<CancelScope>,
    ) -> Result<Arc<dyn RemoteMailClient>, SyncError>;
}

/// Builds Gmail clients from stored credentials
pub struct GmailTokenProvider {
    credentials: GmailCredentials,
    store: Arc<dyn CredentialStore>,
    request_timeout: Duration,
    page_size: u32,
}

impl GmailTokenProvider {
    pub fn new(credentials: GmailCredentials, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            credentials,
            store,
            request_timeout: Duration::from_secs(60),
            page_size: 100,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}

impl TokenProvider for GmailTokenProvider {
    fn client(
        &self,
        account_id: &str,
        scope: &Arc<CancelScope>,
    ) -> Result<Arc<dyn RemoteMailClient>, SyncError> {
        let token = self
            .store
            .load_credential(account_id)?
            .ok_or_else(|| SyncError::CredentialInvalid {
                reason: format!("no stored credential for account {}", account_id),
            })?;

        if !token.is_active {
            return Err(SyncError::CredentialInactive {
                account_id: account_id.to_string(),
            });
        }

        let refreshing = RefreshingTokenSource::new(
            self.credentials.clone(),
            token.clone(),
            scope.clone(),
            self.request_timeout,
        );
        let tokens =
            PersistingTokenSource::new(refreshing, account_id, self.store.clone(), &token);

        let client = GmailClient::new(Arc::new(tokens), scope.clone(), self.request_timeout)
            .with_page_size(self.page_size);
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredToken;
    use crate::storage::InMemoryMailStore;

    fn provider(store: Arc<InMemoryMailStore>) -> GmailTokenProvider {
        GmailTokenProvider::new(
            GmailCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
            store,
        )
    }

    fn scope() -> Arc<CancelScope> {
        Arc::new(CancelScope::with_timeout(Duration::from_secs(5)))
    }

    #[test]
    fn test_missing_credential_is_invalid() {
        let store = Arc::new(InMemoryMailStore::new());
        let err = provider(store).client("acct", &scope()).err().unwrap();
        assert!(matches!(err, SyncError::CredentialInvalid { .. }));
    }

    #[test]
    fn test_inactive_credential_fails_fast() {
        let store = Arc::new(InMemoryMailStore::new());
        let mut token = StoredToken::new("a", Some("r".into()));
        token.is_active = false;
        store.save_credential("acct", &token).unwrap();

        let err = provider(store).client("acct", &scope()).err().unwrap();
        assert!(matches!(err, SyncError::CredentialInactive { .. }));
    }

    #[test]
    fn test_active_credential_builds_client() {
        let store = Arc::new(InMemoryMailStore::new());
        store
            .save_credential("acct", &StoredToken::new("a", Some("r".into())))
            .unwrap();
        assert!(provider(store).client("acct", &scope()).is_ok());
    }
}
