//! Configuration loading for the sync engine
//!
//! OAuth credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)
//!
//! Engine tuning lives in `sync.json`; every field is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials filename in the mailsync config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Engine settings filename in the mailsync config directory
pub const SYNC_CONFIG_FILE: &str = "sync.json";

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials (for production builds)
    /// 2. JSON file (~/.config/mailsync/google-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Get the default credentials file path
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// What a resuming full sync does when the cheap timestamp fetch fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFailurePolicy {
    /// Fall through to the full fetch; upserts are idempotent
    #[default]
    ProcessAnyway,
    /// Count the message as failed
    FailMessage,
}

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent message workers in a full sync
    pub workers: usize,
    /// Capacity of the producer-to-worker queue
    pub queue_capacity: usize,
    /// Message ids requested per listing page
    pub page_size: u32,
    /// Successful messages between checkpoint writes
    pub checkpoint_interval: usize,
    /// Label a full sync walks
    pub scope_label: String,
    /// Deadline for one whole sync call
    pub sync_timeout_secs: u64,
    /// Upper bound for a single HTTP request
    pub request_timeout_secs: u64,
    /// Minimum time between scheduled syncs of one account
    pub cooldown_secs: u64,
    pub metadata_failure_policy: MetadataFailurePolicy,
    /// Runs a message may fail before sync moves past it
    pub max_message_attempts: u32,
    /// SQLite file, relative to the config directory unless absolute
    pub database_file: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 100,
            page_size: 100,
            checkpoint_interval: 50,
            scope_label: "INBOX".to_string(),
            sync_timeout_secs: 600,
            request_timeout_secs: 60,
            cooldown_secs: 300,
            metadata_failure_policy: MetadataFailurePolicy::default(),
            max_message_attempts: 3,
            database_file: PathBuf::from("mailsync.sqlite"),
        }
    }
}

impl SyncConfig {
    /// Load `sync.json` from the config directory, or defaults if absent
    pub fn load() -> Result<Self> {
        let config: Self = config::load_json_or_default(SYNC_CONFIG_FILE)?;
        Ok(config.validated())
    }

    /// Clamp values that would stall the engine
    pub fn validated(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.checkpoint_interval = self.checkpoint_interval.max(1);
        self.page_size = self.page_size.clamp(1, 500);
        self.sync_timeout_secs = self.sync_timeout_secs.max(1);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self.max_message_attempts = self.max_message_attempts.max(1);
        if self.scope_label.is_empty() {
            self.scope_label = "INBOX".to_string();
        }
        self
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolve the database path against the config directory
    pub fn database_path(&self) -> Option<PathBuf> {
        if self.database_file.is_absolute() {
            return Some(self.database_file.clone());
        }
        config::config_dir().map(|dir| dir.join(&self.database_file))
    }
}
