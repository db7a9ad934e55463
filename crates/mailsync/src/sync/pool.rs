//! Bounded producer/worker pipeline for full sync
//!
//! One producer pages the remote listing into a bounded queue; `workers`
//! threads drain it. Everything runs on a dedicated rayon pool while the
//! calling thread coordinates: it receives one outcome per finished job and
//! is the only place that writes sync state.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};

use crate::cancel::CancelScope;
use crate::error::SyncError;
use crate::models::MessageId;

/// How long a worker waits on the queue before re-checking cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Producer back-off while the queue is full
const FULL_QUEUE_BACKOFF: Duration = Duration::from_millis(10);

/// One listed message, numbered in listing order
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub seq: u64,
    pub id: MessageId,
}

/// What a worker did with a job that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    /// Fetched and stored; carries the message's `internal_date`
    Processed(DateTime<Utc>),
    /// Not fetched: filtered by the resume checkpoint or gone remotely
    Skipped,
    /// Failed again after using up its retries; progress moves past it
    Abandoned,
}

/// Handle the producer pushes jobs through
pub(crate) struct Feeder<'a> {
    tx: SyncSender<Job>,
    scope: &'a CancelScope,
    next_seq: u64,
}

impl Feeder<'_> {
    /// Queue `id`, waiting for room; false once the pool is shutting down
    pub fn push(&mut self, id: MessageId) -> bool {
        let mut job = Job {
            seq: self.next_seq,
            id,
        };
        loop {
            if self.scope.is_cancelled() {
                return false;
            }
            match self.tx.try_send(job) {
                Ok(()) => {
                    self.next_seq += 1;
                    return true;
                }
                Err(TrySendError::Full(returned)) => {
                    job = returned;
                    std::thread::sleep(FULL_QUEUE_BACKOFF);
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Jobs queued so far
    pub fn queued(&self) -> u64 {
        self.next_seq
    }
}

/// Result of one pipeline run
#[derive(Debug)]
pub(crate) struct PoolSummary {
    /// How the producer finished; a listing error fails the whole run
    pub producer: Result<(), SyncError>,
    /// Most severe worker error reported, if any
    pub worst_error: Option<SyncError>,
}

/// Runs a producer and `workers` consumers on a borrowed rayon pool
pub(crate) struct WorkerPool<'a> {
    pool: &'a rayon::ThreadPool,
    scope: &'a CancelScope,
    workers: usize,
    queue_capacity: usize,
}

impl<'a> WorkerPool<'a> {
    pub fn new(
        pool: &'a rayon::ThreadPool,
        scope: &'a CancelScope,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        Self {
            pool,
            scope,
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Run the pipeline to completion
    ///
    /// `produce` pushes jobs through the feeder. `work` handles one job on a
    /// worker thread. `on_outcome` runs on the calling thread for every job a
    /// worker finished; `None` means the job failed. A fatal worker error
    /// cancels the scope so the rest of the pipeline stops promptly.
    pub fn run<P, W, C>(&self, produce: P, work: W, mut on_outcome: C) -> PoolSummary
    where
        P: FnOnce(&mut Feeder<'_>) -> Result<(), SyncError> + Send,
        W: Fn(&Job) -> Result<JobOutcome, SyncError> + Sync,
        C: FnMut(u64, Option<JobOutcome>),
    {
        let (job_tx, job_rx) = mpsc::sync_channel::<Job>(self.queue_capacity);
        let (outcome_tx, outcome_rx) = mpsc::channel::<(u64, Option<JobOutcome>)>();
        let (err_tx, err_rx) = mpsc::sync_channel::<SyncError>(self.workers);

        let jobs = Mutex::new(Some(job_rx));
        let producer_result: Mutex<Option<Result<(), SyncError>>> = Mutex::new(None);
        // First error of each severity class
        let mut errors: BTreeMap<u8, SyncError> = BTreeMap::new();

        let scope = self.scope;
        let work = &work;

        self.pool.in_place_scope(|s| {
            let producer_result = &producer_result;
            s.spawn(move |_| {
                let mut feeder = Feeder {
                    tx: job_tx,
                    scope,
                    next_seq: 0,
                };
                let result = produce(&mut feeder);
                debug!("Producer finished after queueing {} jobs", feeder.queued());
                *producer_result
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(result);
            });

            for _ in 0..self.workers {
                let jobs = &jobs;
                let outcome_tx = outcome_tx.clone();
                let err_tx = err_tx.clone();
                s.spawn(move |_| worker_loop(jobs, work, scope, outcome_tx, err_tx));
            }
            drop(outcome_tx);
            drop(err_tx);

            for (seq, outcome) in outcome_rx.iter() {
                on_outcome(seq, outcome);
                collect_errors(&err_rx, &mut errors);
            }
        });

        collect_errors(&err_rx, &mut errors);

        let producer = producer_result
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(Err(SyncError::Cancelled));

        PoolSummary {
            producer,
            worst_error: errors.pop_last().map(|(_, e)| e),
        }
    }
}

fn collect_errors(err_rx: &Receiver<SyncError>, errors: &mut BTreeMap<u8, SyncError>) {
    for err in err_rx.try_iter() {
        errors.entry(err.severity()).or_insert(err);
    }
}

fn worker_loop<W>(
    jobs: &Mutex<Option<Receiver<Job>>>,
    work: &W,
    scope: &CancelScope,
    outcomes: Sender<(u64, Option<JobOutcome>)>,
    errors: SyncSender<SyncError>,
) where
    W: Fn(&Job) -> Result<JobOutcome, SyncError>,
{
    loop {
        if scope.is_cancelled() {
            // Dropping the receiver releases a producer blocked on a full queue
            jobs.lock().unwrap_or_else(PoisonError::into_inner).take();
            break;
        }

        let job = {
            let guard = jobs.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(rx) = guard.as_ref() else {
                break;
            };
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        let outcome = match work(&job) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                if e.is_fatal() {
                    warn!("Stopping sync after message {}: {}", job.id, e);
                    scope.cancel();
                } else {
                    error!("Failed to sync message {}: {}", job.id, e);
                }
                // Never block on reporting; the outcome below still counts it
                let _ = errors.try_send(e);
                None
            }
        };

        if outcomes.send((job.seq, outcome)).is_err() {
            break;
        }
    }
}
