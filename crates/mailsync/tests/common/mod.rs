//! Shared fakes for the engine integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mailsync::gmail::api::{GmailMessage, Header, Label, MessagePayload, ProfileResponse};
use mailsync::{
    AuthError, CancelScope, GmailError, HistoryEvent, HistoryPage, InMemoryMailStore,
    LabelCatalog, MessageId, MessagePage, RemoteMailClient, SyncConfig, SyncEngine, SyncError,
    SyncState, SyncStateStore, TokenProvider,
};

pub const ACCOUNT: &str = "user@example.com";

/// Listing page size served by the fake
const PAGE: usize = 25;

/// Base internal date of the newest message
const NEWEST_SECS: i64 = 1_700_000_000;

/// Timestamp of listing position `i` (0 = newest), one minute apart
pub fn ts(i: usize) -> DateTime<Utc> {
    Utc.timestamp_opt(NEWEST_SECS - 60 * i as i64, 0).unwrap()
}

/// Remote message id for listing position `i`
pub fn id(i: usize) -> String {
    format!("m{:03}", i)
}

/// History id stamped on listing position `i`
pub fn history_id(i: usize) -> String {
    (5_000 - i).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    Ok,
    Expired,
    RateLimited,
    ServerError,
    /// First page serves the events, the second fails with a 503
    ServerErrorOnSecondPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    Ok,
    InvalidGrant,
}

/// Scripted mailbox implementing the remote client capability
pub struct FakeMailbox {
    count: usize,
    pub history: Mutex<Vec<HistoryEvent>>,
    pub history_mode: Mutex<HistoryMode>,
    pub list_mode: Mutex<ListMode>,
    /// `None` makes `get_profile` fail
    pub profile_history_id: Mutex<Option<String>>,
    /// Ids whose full fetch fails with a server error
    pub failing: Mutex<HashSet<String>>,
    /// Ids whose next full fetch fails once with a server error
    pub flaky: Mutex<HashSet<String>>,
    /// Ids whose full fetch is rate limited
    pub rate_limited: Mutex<HashSet<String>>,
    /// Ids whose timestamp fetch fails
    pub timestamp_failing: Mutex<HashSet<String>>,
    /// Ids served without a payload
    pub malformed: Mutex<HashSet<String>>,
    /// Added to every full fetch
    pub fetch_delay: Mutex<Duration>,
    pub full_fetches: AtomicUsize,
    pub timestamp_fetches: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeMailbox {
    pub fn with_messages(count: usize) -> Arc<Self> {
        Arc::new(Self {
            count,
            history: Mutex::new(Vec::new()),
            history_mode: Mutex::new(HistoryMode::Ok),
            list_mode: Mutex::new(ListMode::Ok),
            profile_history_id: Mutex::new(Some("9000".to_string())),
            failing: Mutex::new(HashSet::new()),
            flaky: Mutex::new(HashSet::new()),
            rate_limited: Mutex::new(HashSet::new()),
            timestamp_failing: Mutex::new(HashSet::new()),
            malformed: Mutex::new(HashSet::new()),
            fetch_delay: Mutex::new(Duration::ZERO),
            full_fetches: AtomicUsize::new(0),
            timestamp_fetches: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        })
    }

    pub fn full_fetches(&self) -> usize {
        self.full_fetches.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.full_fetches.store(0, Ordering::SeqCst);
        self.timestamp_fetches.store(0, Ordering::SeqCst);
        self.list_calls.store(0, Ordering::SeqCst);
        self.history_calls.store(0, Ordering::SeqCst);
        self.fetched.lock().unwrap().clear();
    }

    fn index_of(&self, id: &MessageId) -> Option<usize> {
        let i: usize = id.as_str().strip_prefix('m')?.parse().ok()?;
        (i < self.count).then_some(i)
    }
}

impl RemoteMailClient for FakeMailbox {
    fn list_messages(
        &self,
        _label: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, GmailError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if *self.list_mode.lock().unwrap() == ListMode::InvalidGrant {
            return Err(GmailError::Auth(AuthError::InvalidGrant(
                "Token has been expired or revoked.".to_string(),
            )));
        }

        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + PAGE).min(self.count);
        Ok(MessagePage {
            ids: (start..end).map(|i| MessageId::new(id(i))).collect(),
            next_page_token: (end < self.count).then(|| end.to_string()),
        })
    }

    fn get_message(&self, msg_id: &MessageId) -> Result<GmailMessage, GmailError> {
        self.full_fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(msg_id.to_string());
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if self.rate_limited.lock().unwrap().contains(msg_id.as_str()) {
            return Err(GmailError::RateLimited { retry_after: None });
        }
        if self.failing.lock().unwrap().contains(msg_id.as_str())
            || self.flaky.lock().unwrap().remove(msg_id.as_str())
        {
            return Err(GmailError::Api {
                status: 500,
                body: "backend error".to_string(),
            });
        }
        let i = self
            .index_of(msg_id)
            .ok_or_else(|| GmailError::NotFound(msg_id.to_string()))?;

        if self.malformed.lock().unwrap().contains(msg_id.as_str()) {
            return Ok(GmailMessage {
                id: msg_id.to_string(),
                internal_date: ts(i).timestamp_millis().to_string(),
                ..Default::default()
            });
        }

        Ok(GmailMessage {
            id: msg_id.to_string(),
            thread_id: format!("t{:03}", i),
            label_ids: Some(vec!["INBOX".to_string(), "Label_1".to_string()]),
            snippet: format!("Snippet {}", i),
            history_id: Some(history_id(i)),
            internal_date: ts(i).timestamp_millis().to_string(),
            size_estimate: Some(1024),
            payload: Some(MessagePayload {
                headers: Some(vec![
                    Header {
                        name: "From".to_string(),
                        value: "Sender <sender@example.com>".to_string(),
                    },
                    Header {
                        name: "Subject".to_string(),
                        value: format!("Message {}", i),
                    },
                ]),
                ..Default::default()
            }),
        })
    }

    fn get_message_timestamp(&self, msg_id: &MessageId) -> Result<DateTime<Utc>, GmailError> {
        self.timestamp_fetches.fetch_add(1, Ordering::SeqCst);
        if self.timestamp_failing.lock().unwrap().contains(msg_id.as_str()) {
            return Err(GmailError::Transport("connection reset".to_string()));
        }
        self.index_of(msg_id)
            .map(ts)
            .ok_or_else(|| GmailError::NotFound(msg_id.to_string()))
    }

    fn get_profile(&self) -> Result<ProfileResponse, GmailError> {
        match self.profile_history_id.lock().unwrap().clone() {
            Some(history_id) => Ok(ProfileResponse {
                email_address: ACCOUNT.to_string(),
                messages_total: Some(self.count as u64),
                threads_total: None,
                history_id,
            }),
            None => Err(GmailError::Transport("profile unavailable".to_string())),
        }
    }

    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, GmailError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        match *self.history_mode.lock().unwrap() {
            HistoryMode::Ok => Ok(HistoryPage {
                events: self.history.lock().unwrap().clone(),
                next_page_token: None,
                history_id: Some("9000".to_string()),
            }),
            HistoryMode::Expired => Err(GmailError::HistoryExpired {
                cursor: start_history_id.to_string(),
            }),
            HistoryMode::RateLimited => Err(GmailError::RateLimited { retry_after: None }),
            HistoryMode::ServerError => Err(GmailError::Api {
                status: 503,
                body: "unavailable".to_string(),
            }),
            HistoryMode::ServerErrorOnSecondPage => match page_token {
                None => Ok(HistoryPage {
                    events: self.history.lock().unwrap().clone(),
                    next_page_token: Some("2".to_string()),
                    history_id: None,
                }),
                Some(_) => Err(GmailError::Api {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
            },
        }
    }

    fn list_labels(&self) -> Result<Vec<Label>, GmailError> {
        Ok(vec![
            Label {
                id: "INBOX".to_string(),
                name: "INBOX".to_string(),
                label_type: Some("system".to_string()),
            },
            Label {
                id: "Label_1".to_string(),
                name: "Receipts".to_string(),
                label_type: Some("user".to_string()),
            },
        ])
    }
}

/// Hands the same fake mailbox to every sync
pub struct FakeTokens {
    mailbox: Arc<FakeMailbox>,
}

impl TokenProvider for FakeTokens {
    fn client(
        &self,
        _account_id: &str,
        _scope: &Arc<CancelScope>,
    ) -> Result<Arc<dyn RemoteMailClient>, SyncError> {
        let client: Arc<dyn RemoteMailClient> = self.mailbox.clone();
        Ok(client)
    }
}

pub fn config(workers: usize) -> SyncConfig {
    SyncConfig {
        workers,
        queue_capacity: 4,
        checkpoint_interval: 10,
        ..Default::default()
    }
}

pub fn engine<S>(mailbox: &Arc<FakeMailbox>, store: &Arc<S>, config: SyncConfig) -> SyncEngine
where
    S: mailsync::MailStore + 'static,
{
    SyncEngine::new(
        Arc::new(FakeTokens {
            mailbox: mailbox.clone(),
        }),
        store.clone(),
        store.clone(),
        config,
    )
    .unwrap()
}

/// Store with a linked account and no sync history
pub fn linked_store() -> Arc<InMemoryMailStore> {
    let store = Arc::new(InMemoryMailStore::new());
    link(store.as_ref());
    store
}

pub fn link(store: &dyn SyncStateStore) {
    let mut catalog = LabelCatalog::new();
    catalog.insert(
        "Label_1",
        mailsync::LabelInfo::new("Receipts", mailsync::LabelKind::User),
    );
    store
        .create_sync_state(SyncState::new(ACCOUNT, catalog))
        .unwrap();
}

pub fn state(store: &dyn SyncStateStore) -> SyncState {
    store.get_sync_state(ACCOUNT).unwrap().unwrap()
}
