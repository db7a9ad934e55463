//! Full sync: list the scope label and process every message in parallel

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use super::checkpoint::CheckpointTracker;
use super::engine::RunContext;
use super::failures::Disposition;
use super::pool::{Feeder, Job, JobOutcome, PoolSummary, WorkerPool};
use super::{MessageProcessor, SyncStats};
use crate::config::MetadataFailurePolicy;
use crate::error::SyncError;
use crate::gmail::RemoteMailClient;
use crate::models::SyncStateUpdate;

/// Run a full sync, resuming below `resume_from` when set
///
/// Counts go into `stats`. A clean pass clears the checkpoint and stores a
/// fresh cursor. Anything less keeps the checkpoint (persisting the tracker
/// value) so the next run resumes instead of starting over; per-message
/// failures alone still return `Ok`. Messages given up on by the failure
/// ledger count as failed but do not hold the checkpoint back.
pub(crate) fn full_sync(
    ctx: &RunContext<'_>,
    resume_from: Option<DateTime<Utc>>,
    stats: &mut SyncStats,
) -> Result<(), SyncError> {
    let processor = ctx.processor();
    let failures = ctx.failures();
    let tracker = CheckpointTracker::new(resume_from);
    let client = ctx.client.as_ref();
    let label = ctx.config.scope_label.as_str();
    let policy = ctx.config.metadata_failure_policy;
    let interval = ctx.config.checkpoint_interval.max(1);

    // Failures of this pass that the next run must retry
    let mut holes = 0usize;
    let mut since_persist = 0usize;
    let mut persisted = resume_from;

    let pool = WorkerPool::new(
        ctx.pool,
        &ctx.scope,
        ctx.config.workers,
        ctx.config.queue_capacity,
    );
    let PoolSummary {
        producer,
        worst_error,
    } = pool.run(
        |feeder: &mut Feeder<'_>| list_label(client, label, feeder),
        |job: &Job| {
            let outcome = match sync_one(&processor, client, job, resume_from, policy) {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => match failures.record(&job.id, &e) {
                    Disposition::Retry => return Err(e),
                    Disposition::GiveUp => JobOutcome::Abandoned,
                },
            };
            let timestamp = match outcome {
                JobOutcome::Processed(ts) => {
                    failures.succeeded(&job.id);
                    Some(ts)
                }
                JobOutcome::Skipped | JobOutcome::Abandoned => None,
            };
            tracker.complete(job.seq, timestamp);
            Ok(outcome)
        },
        |_, outcome| match outcome {
            Some(JobOutcome::Processed(_)) => {
                stats.messages_processed += 1;
                since_persist += 1;
                if since_persist >= interval {
                    since_persist = 0;
                    persist_checkpoint(ctx, &tracker, &mut persisted);
                }
            }
            Some(JobOutcome::Skipped) => stats.messages_skipped += 1,
            Some(JobOutcome::Abandoned) => stats.messages_failed += 1,
            None => {
                stats.messages_failed += 1;
                holes += 1;
            }
        },
    );

    let cancelled = ctx.scope.is_cancelled();
    if producer.is_ok() && worst_error.is_none() && holes == 0 && !cancelled {
        let cursor = ctx.resolve_cursor()?;
        ctx.update_state(
            &SyncStateUpdate::new()
                .clear_checkpoint()
                .cursor(cursor.clone())
                .synced_at(Utc::now()),
        )?;
        info!(
            "Full sync of {} complete, cursor now {}",
            ctx.account_id, cursor
        );
        return Ok(());
    }

    persist_checkpoint(ctx, &tracker, &mut persisted);

    let mut failure = producer.err();
    if let Some(fatal) = worst_error.filter(SyncError::is_fatal) {
        failure = Some(match failure {
            Some(current) if current.severity() >= fatal.severity() => current,
            _ => fatal,
        });
    }
    if failure.is_none() && cancelled {
        failure = Some(SyncError::Cancelled);
    }

    match failure {
        Some(e) => {
            warn!(
                "Full sync of {} stopped after {} messages, checkpoint {:?}: {}",
                ctx.account_id, stats.messages_processed, persisted, e
            );
            Err(e)
        }
        None => {
            warn!(
                "Full sync of {} left {} messages to retry, checkpoint {:?}",
                ctx.account_id, holes, persisted
            );
            Ok(())
        }
    }
}

/// Page through `label`, feeding every id to the workers
fn list_label(
    client: &dyn RemoteMailClient,
    label: &str,
    feeder: &mut Feeder<'_>,
) -> Result<(), SyncError> {
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if feeder.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let page = client.list_messages(label, page_token.as_deref())?;
        pages += 1;
        debug!("Listed page {} of {} ({} ids)", pages, label, page.ids.len());

        for id in page.ids {
            if !feeder.push(id) {
                return Err(SyncError::Cancelled);
            }
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => return Ok(()),
        }
    }
}

/// Resume filter, then full fetch
fn sync_one(
    processor: &MessageProcessor,
    client: &dyn RemoteMailClient,
    job: &Job,
    resume_from: Option<DateTime<Utc>>,
    policy: MetadataFailurePolicy,
) -> Result<JobOutcome, SyncError> {
    if let Some(checkpoint) = resume_from {
        match client.get_message_timestamp(&job.id).map_err(SyncError::from) {
            Ok(ts) if ts >= checkpoint => return Ok(JobOutcome::Skipped),
            Ok(_) => {}
            Err(SyncError::NotFound(_)) => return Ok(JobOutcome::Skipped),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => match policy {
                MetadataFailurePolicy::ProcessAnyway => {
                    warn!(
                        "Timestamp check failed for {}, processing anyway: {}",
                        job.id, e
                    );
                }
                MetadataFailurePolicy::FailMessage => return Err(e),
            },
        }
    }

    match processor.process(&job.id) {
        Ok(ts) => Ok(JobOutcome::Processed(ts)),
        Err(SyncError::NotFound(_)) => {
            debug!("Message {} deleted before it could be fetched", job.id);
            Ok(JobOutcome::Skipped)
        }
        Err(e) => Err(e),
    }
}

/// Write the tracker value if it moved since the last write
fn persist_checkpoint(
    ctx: &RunContext<'_>,
    tracker: &CheckpointTracker,
    persisted: &mut Option<DateTime<Utc>>,
) {
    let Some(checkpoint) = tracker.checkpoint() else {
        return;
    };
    if *persisted == Some(checkpoint) {
        return;
    }

    match ctx.update_state(&SyncStateUpdate::new().checkpoint(checkpoint)) {
        Ok(()) => {
            debug!("Checkpoint for {} now {}", ctx.account_id, checkpoint);
            *persisted = Some(checkpoint);
        }
        Err(e) => error!(
            "Failed to persist checkpoint for {}: {}",
            ctx.account_id, e
        ),
    }
}
