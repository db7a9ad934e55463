//! mailsyncd - keeps local Gmail mailboxes in sync

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use log::{error, info, warn};
use mailsync::models::StoredToken;
use mailsync::{
    CredentialStore, GmailCredentials, GmailTokenProvider, SqliteMailStore, SyncConfig, SyncEngine,
    SyncRunner,
};

/// Shortest pause between scheduler passes
const MIN_TICK: Duration = Duration::from_secs(30);

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run(cli.command) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    let sync_config = SyncConfig::load().context("Failed to load sync.json")?;
    let db_path = sync_config
        .database_path()
        .context("Could not determine the mailsync config directory")?;
    let store = Arc::new(
        SqliteMailStore::new(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );

    match command {
        Command::ImportToken { account, token } => import_token(store.as_ref(), &account, &token),
        Command::Link { account } => {
            let engine = build_engine(&store, sync_config)?;
            let state = engine.link_account(&account)?;
            info!(
                "Linked {} ({} labels)",
                state.account_id,
                state.label_catalog.len()
            );
            Ok(())
        }
        Command::Sync { account } => {
            let runner = SyncRunner::new(Arc::new(build_engine(&store, sync_config)?));
            let stats = runner.run(&account)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Daemon => {
            let tick = Duration::from_secs(sync_config.cooldown_secs).max(MIN_TICK);
            let runner = SyncRunner::new(Arc::new(build_engine(&store, sync_config)?));
            daemon(&runner, tick)
        }
    }
}

fn build_engine(store: &Arc<SqliteMailStore>, sync_config: SyncConfig) -> Result<SyncEngine> {
    let credentials = match GmailCredentials::load() {
        Ok(creds) => creds,
        Err(e) => {
            if let Some(path) = GmailCredentials::default_credentials_path() {
                warn!(
                    "To configure Gmail access, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                    path.display()
                );
            }
            return Err(e.context("Gmail credentials not found"));
        }
    };

    let tokens = GmailTokenProvider::new(credentials, store.clone())
        .with_request_timeout(sync_config.request_timeout())
        .with_page_size(sync_config.page_size);

    SyncEngine::new(Arc::new(tokens), store.clone(), store.clone(), sync_config)
}

/// Store an OAuth token obtained out of band
fn import_token(store: &dyn CredentialStore, account: &str, path: &Path) -> Result<()> {
    let token: StoredToken = config::load_json_file(path)?;
    if token.refresh_token.is_none() {
        warn!("Token for {} has no refresh token; it stops working once it expires", account);
    }
    store.save_credential(account, &token)?;
    info!("Imported token for {}", account);
    Ok(())
}

fn daemon(runner: &SyncRunner, tick: Duration) -> Result<()> {
    for (account, result) in runner.resume_stale()? {
        if let Err(e) = result {
            warn!("Resumed sync of {} failed: {}", account, e);
        }
    }

    info!("Scheduler running every {}s", tick.as_secs());
    loop {
        match runner.run_due() {
            Ok(runs) => {
                for (account, result) in runs {
                    if let Err(e) = result {
                        warn!("Scheduled sync of {} failed: {}", account, e);
                    }
                }
            }
            Err(e) => error!("Failed to list accounts: {:#}", e),
        }
        std::thread::sleep(tick);
    }
}
