//! SQLite-based storage for messages, sync state and credentials

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use rusqlite_migration::{M, Migrations};

use super::traits::{CredentialStore, MessageStore, SyncStateStore};
use crate::models::{
    ExternalMetadata, LabelCatalog, Message, MessageFlags, MessageId, StoredToken, SyncState,
    SyncStateUpdate, SyncStatus,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Sync state per account
            CREATE TABLE sync_state (
                account_id TEXT PRIMARY KEY,
                cursor TEXT NOT NULL DEFAULT '',
                full_sync_checkpoint INTEGER,  -- unix millis
                last_synced_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                label_catalog TEXT NOT NULL DEFAULT '{}'
            );

            -- OAuth token material per account
            CREATE TABLE credentials (
                account_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_type TEXT NOT NULL DEFAULT 'Bearer',
                expires_at INTEGER,  -- unix millis
                is_active INTEGER NOT NULL DEFAULT 1,
                last_used TEXT
            );

            -- Normalized messages, one row per remote id
            CREATE TABLE messages (
                remote_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                from_addr TEXT NOT NULL,
                to_addr TEXT NOT NULL,
                subject TEXT NOT NULL,
                snippet TEXT NOT NULL,
                body TEXT NOT NULL,
                internal_date INTEGER NOT NULL,
                received_date INTEGER NOT NULL,
                is_unread INTEGER NOT NULL DEFAULT 0,
                is_important INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                is_spam INTEGER NOT NULL DEFAULT 0,
                is_inbox INTEGER NOT NULL DEFAULT 0,
                is_trash INTEGER NOT NULL DEFAULT 0,
                is_draft INTEGER NOT NULL DEFAULT 0,
                is_sent INTEGER NOT NULL DEFAULT 0,
                custom_labels TEXT NOT NULL DEFAULT '{}',
                external_metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX idx_messages_account_received
                ON messages(account_id, received_date DESC);
            CREATE INDEX idx_messages_account_internal
                ON messages(account_id, internal_date ASC);
            "#,
        ),
        // Migration 2: Run bookkeeping for stale-run repair
        M::up(
            r#"
            ALTER TABLE sync_state ADD COLUMN sync_status TEXT NOT NULL DEFAULT 'idle';
            "#,
        ),
        // Migration 3: Store every timestamp as unix millis
        M::up(
            r#"
            ALTER TABLE sync_state ADD COLUMN last_synced_ms INTEGER;
            UPDATE sync_state
                SET last_synced_ms = CAST(ROUND((julianday(last_synced_at) - 2440587.5) * 86400000) AS INTEGER)
                WHERE last_synced_at IS NOT NULL;
            ALTER TABLE sync_state DROP COLUMN last_synced_at;
            ALTER TABLE sync_state RENAME COLUMN last_synced_ms TO last_synced_at;

            ALTER TABLE credentials ADD COLUMN last_used_ms INTEGER;
            UPDATE credentials
                SET last_used_ms = CAST(ROUND((julianday(last_used) - 2440587.5) * 86400000) AS INTEGER)
                WHERE last_used IS NOT NULL;
            ALTER TABLE credentials DROP COLUMN last_used;
            ALTER TABLE credentials RENAME COLUMN last_used_ms TO last_used;
            "#,
        ),
        // Migration 4: Failed attempts per message, so sync can move past
        // messages that never succeed
        M::up(
            r#"
            CREATE TABLE message_failures (
                account_id TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                last_error TEXT NOT NULL,
                updated_at INTEGER NOT NULL,  -- unix millis
                PRIMARY KEY (account_id, remote_id)
            );
            "#,
        ),
    ])
}

const MESSAGE_COLUMNS: &str = "remote_id, account_id, thread_id, from_addr, to_addr, subject,
     snippet, body, internal_date, received_date, is_unread, is_important, is_starred,
     is_spam, is_inbox, is_trash, is_draft, is_sent, custom_labels, external_metadata";

const SYNC_STATE_COLUMNS: &str = "account_id, cursor, full_sync_checkpoint, last_synced_at,
     is_active, label_catalog, sync_status";

/// SQLite-based mail storage
///
/// One connection behind a mutex; workers serialize on it for upserts.
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed while a worker writes; NORMAL sync is
        // durable enough under WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .with_context(|| format!("Invalid timestamp: {}", millis))
}

/// Raw column values of a `messages` row
struct MessageRow {
    remote_id: String,
    account_id: String,
    thread_id: String,
    from: String,
    to: String,
    subject: String,
    snippet: String,
    body: String,
    internal_date: i64,
    received_date: i64,
    flags: MessageFlags,
    custom_labels: String,
    external_metadata: String,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            remote_id: row.get(0)?,
            account_id: row.get(1)?,
            thread_id: row.get(2)?,
            from: row.get(3)?,
            to: row.get(4)?,
            subject: row.get(5)?,
            snippet: row.get(6)?,
            body: row.get(7)?,
            internal_date: row.get(8)?,
            received_date: row.get(9)?,
            flags: MessageFlags {
                is_unread: row.get(10)?,
                is_important: row.get(11)?,
                is_starred: row.get(12)?,
                is_spam: row.get(13)?,
                is_inbox: row.get(14)?,
                is_trash: row.get(15)?,
                is_draft: row.get(16)?,
                is_sent: row.get(17)?,
            },
            custom_labels: row.get(18)?,
            external_metadata: row.get(19)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        let custom_labels = serde_json::from_str(&self.custom_labels)
            .with_context(|| format!("Invalid custom_labels for {}", self.remote_id))?;
        let external_metadata = ExternalMetadata::from_json(&self.external_metadata)
            .with_context(|| format!("Invalid external_metadata for {}", self.remote_id))?;

        Ok(Message {
            id: MessageId::new(self.remote_id),
            account_id: self.account_id,
            thread_id: self.thread_id,
            from: self.from,
            to: self.to,
            subject: self.subject,
            snippet: self.snippet,
            body: self.body,
            internal_date: millis_to_datetime(self.internal_date)?,
            received_date: millis_to_datetime(self.received_date)?,
            flags: self.flags,
            custom_labels,
            external_metadata,
        })
    }
}

/// Raw column values of a `sync_state` row
struct SyncStateRow {
    account_id: String,
    cursor: String,
    full_sync_checkpoint: Option<i64>,
    last_synced_at: Option<i64>,
    is_active: bool,
    label_catalog: String,
    sync_status: String,
}

impl SyncStateRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            account_id: row.get(0)?,
            cursor: row.get(1)?,
            full_sync_checkpoint: row.get(2)?,
            last_synced_at: row.get(3)?,
            is_active: row.get(4)?,
            label_catalog: row.get(5)?,
            sync_status: row.get(6)?,
        })
    }

    fn into_state(self) -> Result<SyncState> {
        let label_catalog = LabelCatalog::from_json(&self.label_catalog)
            .with_context(|| format!("Invalid label_catalog for {}", self.account_id))?;

        Ok(SyncState {
            full_sync_checkpoint: self.full_sync_checkpoint.map(millis_to_datetime).transpose()?,
            last_synced_at: self.last_synced_at.map(millis_to_datetime).transpose()?,
            account_id: self.account_id,
            cursor: self.cursor,
            is_active: self.is_active,
            label_catalog,
            sync_status: SyncStatus::from(self.sync_status),
        })
    }
}

impl MessageStore for SqliteMailStore {
    fn upsert_message(&self, message: Message) -> Result<()> {
        let custom_labels = serde_json::to_string(&message.custom_labels)?;
        let conn = self.conn()?;

        // ON CONFLICT keeps the row identity; one row per remote id
        conn.execute(
            "INSERT INTO messages
             (remote_id, account_id, thread_id, from_addr, to_addr, subject, snippet, body,
              internal_date, received_date, is_unread, is_important, is_starred, is_spam,
              is_inbox, is_trash, is_draft, is_sent, custom_labels, external_metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(remote_id) DO UPDATE SET
                account_id = excluded.account_id,
                thread_id = excluded.thread_id,
                from_addr = excluded.from_addr,
                to_addr = excluded.to_addr,
                subject = excluded.subject,
                snippet = excluded.snippet,
                body = excluded.body,
                internal_date = excluded.internal_date,
                received_date = excluded.received_date,
                is_unread = excluded.is_unread,
                is_important = excluded.is_important,
                is_starred = excluded.is_starred,
                is_spam = excluded.is_spam,
                is_inbox = excluded.is_inbox,
                is_trash = excluded.is_trash,
                is_draft = excluded.is_draft,
                is_sent = excluded.is_sent,
                custom_labels = excluded.custom_labels,
                external_metadata = excluded.external_metadata",
            params![
                message.id.as_str(),
                message.account_id,
                message.thread_id,
                message.from,
                message.to,
                message.subject,
                message.snippet,
                message.body,
                message.internal_date.timestamp_millis(),
                message.received_date.timestamp_millis(),
                message.flags.is_unread,
                message.flags.is_important,
                message.flags.is_starred,
                message.flags.is_spam,
                message.flags.is_inbox,
                message.flags.is_trash,
                message.flags.is_draft,
                message.flags.is_sent,
                custom_labels,
                message.external_metadata.to_json(),
            ],
        )?;

        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE remote_id = ?", MESSAGE_COLUMNS),
                [id.as_str()],
                MessageRow::read,
            )
            .optional()?;
        row.map(MessageRow::into_message).transpose()
    }

    fn find_latest_by_received(&self, account_id: &str) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM messages WHERE account_id = ?
                     ORDER BY received_date DESC, remote_id DESC LIMIT 1",
                    MESSAGE_COLUMNS
                ),
                [account_id],
                MessageRow::read,
            )
            .optional()?;
        row.map(MessageRow::into_message).transpose()
    }

    fn find_oldest_internal_date(&self, account_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let millis: Option<i64> = conn.query_row(
            "SELECT MIN(internal_date) FROM messages WHERE account_id = ?",
            [account_id],
            |row| row.get(0),
        )?;
        millis.map(millis_to_datetime).transpose()
    }

    fn count_messages(&self, account_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn record_message_failure(
        &self,
        account_id: &str,
        id: &MessageId,
        error: &str,
    ) -> Result<u32> {
        let conn = self.conn()?;
        let attempts: u32 = conn.query_row(
            "INSERT INTO message_failures (account_id, remote_id, attempts, last_error, updated_at)
             VALUES (?, ?, 1, ?, ?)
             ON CONFLICT(account_id, remote_id) DO UPDATE SET
                attempts = attempts + 1,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
             RETURNING attempts",
            params![account_id, id.as_str(), error, Utc::now().timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }

    fn clear_message_failure(&self, account_id: &str, id: &MessageId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM message_failures WHERE account_id = ? AND remote_id = ?",
            params![account_id, id.as_str()],
        )?;
        Ok(())
    }

    fn message_failures(&self, account_id: &str) -> Result<HashMap<MessageId, u32>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT remote_id, attempts FROM message_failures WHERE account_id = ?")?;
        let failures = stmt
            .query_map([account_id], |row| {
                Ok((MessageId::new(row.get::<_, String>(0)?), row.get(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(failures)
    }
}

impl SyncStateStore for SqliteMailStore {
    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM sync_state WHERE account_id = ?", SYNC_STATE_COLUMNS),
                [account_id],
                SyncStateRow::read,
            )
            .optional()?;
        row.map(SyncStateRow::into_state).transpose()
    }

    fn create_sync_state(&self, state: SyncState) -> Result<SyncState> {
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO sync_state
                 (account_id, cursor, full_sync_checkpoint, last_synced_at, is_active,
                  label_catalog, sync_status)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(account_id) DO UPDATE SET
                    label_catalog = excluded.label_catalog",
                params![
                    state.account_id,
                    state.cursor,
                    state.full_sync_checkpoint.map(|t| t.timestamp_millis()),
                    state.last_synced_at.map(|t| t.timestamp_millis()),
                    state.is_active,
                    state.label_catalog.to_json(),
                    state.sync_status.to_string(),
                ],
            )?;
        }

        self.get_sync_state(&state.account_id)?
            .with_context(|| format!("Sync state for {} missing after insert", state.account_id))
    }

    fn update_sync_state(&self, account_id: &str, update: &SyncStateUpdate) -> Result<()> {
        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(cursor) = &update.cursor {
            columns.push("cursor = ?");
            values.push(Value::Text(cursor.clone()));
        }
        if let Some(checkpoint) = update.full_sync_checkpoint {
            columns.push("full_sync_checkpoint = ?");
            values.push(checkpoint.map_or(Value::Null, |t| Value::Integer(t.timestamp_millis())));
        }
        if let Some(last_synced_at) = update.last_synced_at {
            columns.push("last_synced_at = ?");
            values.push(Value::Integer(last_synced_at.timestamp_millis()));
        }
        if let Some(is_active) = update.is_active {
            columns.push("is_active = ?");
            values.push(Value::Integer(is_active as i64));
        }
        if let Some(catalog) = &update.label_catalog {
            columns.push("label_catalog = ?");
            values.push(Value::Text(catalog.to_json()));
        }
        if let Some(status) = &update.sync_status {
            columns.push("sync_status = ?");
            values.push(Value::Text(status.to_string()));
        }

        let conn = self.conn()?;
        if columns.is_empty() {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sync_state WHERE account_id = ?)",
                [account_id],
                |row| row.get(0),
            )?;
            if !exists {
                bail!("No sync state for account {}", account_id);
            }
            return Ok(());
        }

        values.push(Value::Text(account_id.to_string()));
        let sql = format!(
            "UPDATE sync_state SET {} WHERE account_id = ?",
            columns.join(", ")
        );
        let changed = conn.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            bail!("No sync state for account {}", account_id);
        }
        Ok(())
    }

    fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sync_state ORDER BY account_id",
            SYNC_STATE_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], SyncStateRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(SyncStateRow::into_state).collect()
    }
}

impl CredentialStore for SqliteMailStore {
    fn load_credential(&self, account_id: &str) -> Result<Option<StoredToken>> {
        let conn = self.conn()?;
        let row: Option<(String, Option<String>, String, Option<i64>, bool, Option<i64>)> = conn
            .query_row(
                "SELECT access_token, refresh_token, token_type, expires_at, is_active, last_used
                 FROM credentials WHERE account_id = ?",
                [account_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((access_token, refresh_token, token_type, expires_at, is_active, last_used)) = row
        else {
            return Ok(None);
        };

        Ok(Some(StoredToken {
            access_token,
            refresh_token,
            token_type,
            expires_at: expires_at.map(millis_to_datetime).transpose()?,
            is_active,
            last_used: last_used.map(millis_to_datetime).transpose()?,
        }))
    }

    fn save_credential(&self, account_id: &str, token: &StoredToken) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO credentials
             (account_id, access_token, refresh_token, token_type, expires_at, is_active, last_used)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                account_id,
                token.access_token,
                token.refresh_token,
                token.token_type,
                token.expires_at.map(|t| t.timestamp_millis()),
                token.is_active,
                token.last_used.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    fn mark_credential_inactive(&self, account_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE credentials SET is_active = 0 WHERE account_id = ?",
            [account_id],
        )?;
        if changed == 0 {
            bail!("No credential for account {}", account_id);
        }
        Ok(())
    }
}
