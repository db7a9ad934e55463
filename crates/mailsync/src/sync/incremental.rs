//! Incremental sync: walk the history since the stored cursor

use std::collections::HashSet;

use chrono::Utc;
use log::{debug, error, info, warn};

use super::SyncStats;
use super::engine::RunContext;
use super::failures::Disposition;
use crate::error::SyncError;
use crate::models::{MessageId, SyncStateUpdate};

/// Apply every change since `cursor`, counting into `stats`
///
/// Each message is processed at most once per walk. When a message failed
/// and still has retries left, the cursor is left where it was so the next
/// walk retries it; messages given up on do not hold the cursor.
pub(crate) fn incremental_sync(
    ctx: &RunContext<'_>,
    cursor: &str,
    stats: &mut SyncStats,
) -> Result<(), SyncError> {
    if cursor.trim().parse::<u64>().is_err() {
        return Err(SyncError::CursorExpired {
            cursor: cursor.to_string(),
        });
    }

    let processor = ctx.processor();
    let failures = ctx.failures();
    let mut retry_pending = 0usize;
    let mut seen: HashSet<MessageId> = HashSet::new();
    let mut page_token: Option<String> = None;

    loop {
        if ctx.scope.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let page = ctx.client.list_history(cursor, page_token.as_deref())?;
        debug!(
            "History page for {}: {} events",
            ctx.account_id,
            page.events.len()
        );

        for event in page.events {
            if !seen.insert(event.message_id.clone()) {
                stats.messages_skipped += 1;
                continue;
            }
            if ctx.scope.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match processor.process(&event.message_id) {
                Ok(_) => {
                    failures.succeeded(&event.message_id);
                    stats.messages_processed += 1;
                }
                Err(SyncError::NotFound(_)) => {
                    debug!("Message {} no longer exists", event.message_id);
                    stats.messages_skipped += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    stats.messages_failed += 1;
                    if failures.record(&event.message_id, &e) == Disposition::Retry {
                        error!("Failed to sync message {}: {}", event.message_id, e);
                        retry_pending += 1;
                    }
                }
            }
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    if retry_pending > 0 {
        warn!(
            "Incremental sync of {} has {} messages to retry, keeping cursor {}",
            ctx.account_id, retry_pending, cursor
        );
        return Ok(());
    }

    let next = ctx.resolve_cursor()?;
    ctx.update_state(
        &SyncStateUpdate::new()
            .cursor(next.clone())
            .synced_at(Utc::now()),
    )?;
    info!(
        "Incremental sync of {} applied {} changes, cursor {} -> {}",
        ctx.account_id, stats.messages_processed, cursor, next
    );
    Ok(())
}
