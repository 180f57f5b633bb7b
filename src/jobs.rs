//! Background work the engine hands off: syncs, remote teardown and balance
//! recomputes.
//!
//! [`LocalQueue`] is an in-process queue drained by a [`Worker`] before the
//! CLI exits.

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::link;
use crate::monitor::Reporter;
use crate::store::SqliteStore;
use crate::sync::{SyncOutcome, SyncWindow, Syncer};
use crate::upstream::BankData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Sync {
        connection_id: String,
        window: SyncWindow,
    },
    Teardown {
        connection_id: String,
    },
    /// Ask the balance history to be rebuilt for the synced window.
    RecomputeBalances {
        account_id: String,
        window: SyncWindow,
    },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    fn enqueue_sync(&self, connection_id: &str) -> Result<(), QueueError> {
        self.enqueue(Job::Sync {
            connection_id: connection_id.to_string(),
            window: SyncWindow::default(),
        })
    }

    fn enqueue_teardown(&self, connection_id: &str) -> Result<(), QueueError> {
        self.enqueue(Job::Teardown {
            connection_id: connection_id.to_string(),
        })
    }
}

pub struct LocalQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl LocalQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Takes every job queued so far.
    pub fn drain(&self) -> Vec<Job> {
        self.rx.try_iter().collect()
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for LocalQueue {
    fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.tx.send(job).map_err(|_| QueueError::Closed)
    }
}

/// Queues a sync for every connection that is not being deleted. A failed
/// enqueue is logged and the rest still go out.
pub async fn schedule_syncs(
    store: &SqliteStore,
    bank: Option<&dyn BankData>,
    queue: &dyn JobQueue,
    window: SyncWindow,
) -> Result<usize, crate::store::Error> {
    if bank.is_none() {
        info!("aggregator is not configured, no syncs scheduled");
        return Ok(0);
    }

    let mut scheduled = 0;
    for conn in store.connections().active().await? {
        let job = Job::Sync {
            connection_id: conn.id.clone(),
            window,
        };
        match queue.enqueue(job) {
            Ok(()) => scheduled += 1,
            Err(err) => error!(connection_id = %conn.id, error = %err, "failed to schedule sync"),
        }
    }

    info!(scheduled, "scheduled syncs");

    Ok(scheduled)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub completed: usize,
    pub failed: usize,
}

pub struct Worker<'a> {
    store: &'a SqliteStore,
    bank: &'a dyn BankData,
    queue: &'a LocalQueue,
    reporter: &'a dyn Reporter,
}

impl<'a> Worker<'a> {
    pub fn new(
        store: &'a SqliteStore,
        bank: &'a dyn BankData,
        queue: &'a LocalQueue,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            store,
            bank,
            queue,
            reporter,
        }
    }

    /// Runs jobs until the queue is empty, including jobs queued by the jobs
    /// themselves.
    pub async fn run_until_idle(&self) -> WorkerReport {
        let mut report = WorkerReport::default();

        loop {
            let jobs = self.queue.drain();
            if jobs.is_empty() {
                break;
            }

            for job in jobs {
                if self.perform(job).await {
                    report.completed += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn perform(&self, job: Job) -> bool {
        match job {
            Job::Sync {
                connection_id,
                window,
            } => {
                let syncer = Syncer::new(self.store, self.bank, self.queue, self.reporter);
                match syncer.perform_sync(&connection_id, window).await {
                    Ok(SyncOutcome::Synced(_)) => {
                        if let Err(err) = syncer.perform_post_sync(&connection_id).await {
                            warn!(%connection_id, error = %err, "post-sync step failed");
                        }
                        true
                    }
                    Ok(SyncOutcome::Skipped(reason)) => {
                        info!(%connection_id, ?reason, "sync skipped");
                        true
                    }
                    Err(err) => {
                        error!(%connection_id, error = %err, "sync failed");
                        false
                    }
                }
            }
            Job::Teardown { connection_id } => {
                match link::teardown(self.store, self.bank, &connection_id).await {
                    Ok(()) => true,
                    Err(err) => {
                        error!(%connection_id, error = %err, "teardown failed");
                        false
                    }
                }
            }
            Job::RecomputeBalances { account_id, window } => {
                info!(
                    %account_id,
                    start = ?window.start,
                    end = ?window.end,
                    "balance recompute requested"
                );
                true
            }
        }
    }
}
