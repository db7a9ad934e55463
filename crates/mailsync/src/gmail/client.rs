//! Gmail API HTTP client
//!
//! Implements [`RemoteMailClient`] over the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use url::Url;

use super::api::{
    GmailMessage, HistoryResponse, Label, ListLabelsResponse, ListMessagesResponse,
    ProfileResponse,
};
use super::error::is_history_not_found;
use super::normalize::parse_internal_date;
use super::{GmailError, HistoryEvent, HistoryPage, MessagePage, RemoteMailClient, TokenSource};
use crate::cancel::CancelScope;
use crate::models::MessageId;

/// Attempts for idempotent reads that fail transiently
const MAX_ATTEMPTS: u32 = 3;

/// Gmail API client bound to one account and one sync's cancel scope
pub struct GmailClient {
    tokens: Arc<dyn TokenSource>,
    agent: ureq::Agent,
    scope: Arc<CancelScope>,
    request_timeout: Duration,
    page_size: u32,
    base_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    pub const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a new Gmail client
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        scope: Arc<CancelScope>,
        request_timeout: Duration,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(request_timeout))
            .build()
            .into();

        Self {
            tokens,
            agent,
            scope,
            request_timeout,
            page_size: 100,
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Messages requested per listing page (1-500)
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 500);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, GmailError> {
        Url::parse(&format!("{}/users/me/{}", self.base_url, path))
            .map_err(|e| GmailError::Transport(format!("invalid URL for {}: {}", path, e)))
    }

    /// Issue an authorized GET and return status, body text and Retry-After
    fn get_raw(&self, url: &Url) -> Result<(u16, String, Option<Duration>), GmailError> {
        if self.scope.is_cancelled() {
            return Err(GmailError::Cancelled);
        }
        let token = self.tokens.token()?;
        let timeout = self
            .scope
            .clamp(self.request_timeout)
            .ok_or(GmailError::Cancelled)?;

        let result = self
            .agent
            .get(url.as_str())
            .header("Authorization", &format!("Bearer {}", token.access_token))
            .config()
            .timeout_global(Some(timeout))
            .build()
            .call();

        let mut response = match result {
            Ok(response) => response,
            Err(_) if self.scope.is_cancelled() => return Err(GmailError::Cancelled),
            Err(e) => return Err(GmailError::Transport(format!("{}: {}", url.path(), e))),
        };

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| GmailError::Transport(format!("reading {}: {}", url.path(), e)))?;

        Ok((status, body, retry_after))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, GmailError> {
        let (status, body, retry_after) = self.get_raw(url)?;
        if !(200..300).contains(&status) {
            return Err(GmailError::from_status(status, body, retry_after));
        }
        serde_json::from_str(&body)
            .map_err(|e| GmailError::Decode(format!("{}: {}", url.path(), e)))
    }

    /// Run an idempotent read with exponential backoff on transient errors
    fn with_retry<T>(&self, mut op: impl FnMut() -> Result<T, GmailError>) -> Result<T, GmailError> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    debug!("Retrying after transient error (attempt {}): {}", attempt, e);
                    let jitter = Duration::from_millis(rand_jitter());
                    if !self.scope.sleep(delay + jitter) {
                        return Err(GmailError::Cancelled);
                    }
                    delay *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl RemoteMailClient for GmailClient {
    fn list_messages(
        &self,
        label: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, GmailError> {
        let mut url = self.endpoint("messages")?;
        url.query_pairs_mut()
            .append_pair("labelIds", label)
            .append_pair("maxResults", &self.page_size.to_string());
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }

        let list: ListMessagesResponse = self.with_retry(|| self.get_json(&url))?;
        Ok(MessagePage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    fn get_message(&self, id: &MessageId) -> Result<GmailMessage, GmailError> {
        let mut url = self.endpoint(&format!("messages/{}", id.as_str()))?;
        url.query_pairs_mut().append_pair("format", "full");
        self.with_retry(|| self.get_json(&url))
    }

    fn get_message_timestamp(&self, id: &MessageId) -> Result<DateTime<Utc>, GmailError> {
        let mut url = self.endpoint(&format!("messages/{}", id.as_str()))?;
        url.query_pairs_mut().append_pair("format", "minimal");
        let message: GmailMessage = self.with_retry(|| self.get_json(&url))?;
        parse_internal_date(&message.internal_date).ok_or_else(|| {
            GmailError::Decode(format!("message {} has no internal date", id.as_str()))
        })
    }

    fn get_profile(&self) -> Result<ProfileResponse, GmailError> {
        let url = self.endpoint("profile")?;
        self.with_retry(|| self.get_json(&url))
    }

    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, GmailError> {
        let mut url = self.endpoint("history")?;
        url.query_pairs_mut()
            .append_pair("startHistoryId", start_history_id)
            .append_pair("historyTypes", "messageAdded")
            .append_pair("historyTypes", "labelAdded")
            .append_pair("historyTypes", "labelRemoved");
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }

        let (status, body, retry_after) = self.get_raw(&url)?;
        if !(200..300).contains(&status) {
            if is_history_not_found(status, &body) {
                return Err(GmailError::HistoryExpired {
                    cursor: start_history_id.to_string(),
                });
            }
            return Err(GmailError::from_status(status, body, retry_after));
        }

        let response: HistoryResponse = serde_json::from_str(&body)
            .map_err(|e| GmailError::Decode(format!("history: {}", e)))?;
        Ok(history_page(response))
    }

    fn list_labels(&self) -> Result<Vec<Label>, GmailError> {
        let url = self.endpoint("labels")?;
        let labels: ListLabelsResponse = self.with_retry(|| self.get_json(&url))?;
        Ok(labels.labels.unwrap_or_default())
    }
}

/// Flatten history records into events, preserving remote order
fn history_page(response: HistoryResponse) -> HistoryPage {
    let mut events = Vec::new();
    for record in response.history.unwrap_or_default() {
        for added in record.messages_added.unwrap_or_default() {
            events.push(HistoryEvent::added(added.message.id));
        }
        let label_changes = record
            .labels_added
            .unwrap_or_default()
            .into_iter()
            .chain(record.labels_removed.unwrap_or_default());
        for change in label_changes {
            events.push(HistoryEvent::labels_changed(change.message.id));
        }
    }

    HistoryPage {
        events,
        next_page_token: response.next_page_token,
        history_id: response.history_id,
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::HistoryEventKind;

    #[test]
    fn test_history_page_flattens_in_order() {
        let json = r#"{
            "history": [
                {"id": "1", "messagesAdded": [{"message": {"id": "m1", "threadId": "t1"}}]},
                {"id": "2", "labelsAdded": [{"message": {"id": "m1", "threadId": "t1"}, "labelIds": ["STARRED"]}]},
                {"id": "3", "messagesAdded": [{"message": {"id": "m2", "threadId": "t2"}}],
                           "labelsRemoved": [{"message": {"id": "m3"}, "labelIds": ["UNREAD"]}]}
            ],
            "nextPageToken": "p2",
            "historyId": "99"
        }"#;
        let response: HistoryResponse = serde_json::from_str(json).unwrap();
        let page = history_page(response);

        let ids: Vec<_> = page
            .events
            .iter()
            .map(|e| (e.kind, e.message_id.as_str().to_string()))
            .collect();
        assert_eq!(
            ids,
            vec![
                (HistoryEventKind::MessageAdded, "m1".to_string()),
                (HistoryEventKind::LabelsChanged, "m1".to_string()),
                (HistoryEventKind::MessageAdded, "m2".to_string()),
                (HistoryEventKind::LabelsChanged, "m3".to_string()),
            ]
        );
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
        assert_eq!(page.history_id.as_deref(), Some("99"));
    }

    #[test]
    fn test_empty_history_response() {
        let response: HistoryResponse = serde_json::from_str(r#"{"historyId": "5"}"#).unwrap();
        let page = history_page(response);
        assert!(page.events.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_endpoint_urls() {
        struct NoTokens;
        impl TokenSource for NoTokens {
            fn token(&self) -> Result<crate::models::StoredToken, crate::gmail::AuthError> {
                Err(crate::gmail::AuthError::MissingRefreshToken)
            }
        }

        let client = GmailClient::new(
            Arc::new(NoTokens),
            Arc::new(CancelScope::with_timeout(Duration::from_secs(5))),
            Duration::from_secs(5),
        );
        let url = client.endpoint("messages/abc").unwrap();
        assert_eq!(
            url.as_str(),
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/abc"
        );
    }

    #[test]
    fn test_cancelled_scope_short_circuits() {
        struct NoTokens;
        impl TokenSource for NoTokens {
            fn token(&self) -> Result<crate::models::StoredToken, crate::gmail::AuthError> {
                panic!("token must not be requested once cancelled");
            }
        }

        let scope = Arc::new(CancelScope::with_timeout(Duration::from_secs(5)));
        scope.cancel();
        let client = GmailClient::new(Arc::new(NoTokens), scope, Duration::from_secs(5));
        assert!(matches!(client.get_profile(), Err(GmailError::Cancelled)));
    }

    #[test]
    fn test_permanent_auth_error_surfaces() {
        struct Revoked;
        impl TokenSource for Revoked {
            fn token(&self) -> Result<crate::models::StoredToken, crate::gmail::AuthError> {
                Err(crate::gmail::AuthError::InvalidGrant("revoked".into()))
            }
        }

        let client = GmailClient::new(
            Arc::new(Revoked),
            Arc::new(CancelScope::with_timeout(Duration::from_secs(5))),
            Duration::from_secs(5),
        );
        let err = client.list_labels().unwrap_err();
        assert!(matches!(err, GmailError::Auth(_)));
        assert!(!err.is_retryable());
    }
}
