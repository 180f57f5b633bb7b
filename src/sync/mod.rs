//! Pulls a connection's data from the aggregator and reconciles it into the
//! ledger.
//!
//! A sync runs in fixed stages: snapshot import, account reconciliation,
//! transaction reconciliation, then a balance recompute request per ledger
//! account. Each stage only reads what earlier stages stored.

pub mod account;
pub mod category;
pub mod importer;
pub mod txn;

use chrono::{Duration, NaiveDate, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::{Connection, ConnectionStatus, LedgerAccount, LinkedAccount};
use crate::jobs::{Job, JobQueue, QueueError};
use crate::monitor::Reporter;
use crate::store::SqliteStore;
use crate::upstream::BankData;
use importer::ImportOutcome;

/// How long a sync may hold a connection before others may take over.
pub const LEASE_TTL_MINUTES: i64 = 30;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] gocardless::Error),
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("malformed snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
    #[error("invalid date {0:?}")]
    InvalidDate(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Date bounds for the transactions a sync asks for. Open ends fall back to
/// the aggregator's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another sync holds the connection.
    Leased,
    ScheduledForDeletion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub status: ConnectionStatus,
    /// Whether fresh data was pulled, as opposed to reconciling what was
    /// already stored.
    pub imported: bool,
    pub ledger_accounts: Vec<String>,
    pub entries: usize,
    /// Linked accounts whose transactions failed to reconcile.
    pub failed_accounts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced(SyncReport),
    Skipped(SkipReason),
}

pub struct Syncer<'a> {
    store: &'a SqliteStore,
    bank: &'a dyn BankData,
    queue: &'a dyn JobQueue,
    reporter: &'a dyn Reporter,
}

impl<'a> Syncer<'a> {
    pub fn new(
        store: &'a SqliteStore,
        bank: &'a dyn BankData,
        queue: &'a dyn JobQueue,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            store,
            bank,
            queue,
            reporter,
        }
    }

    #[tracing::instrument(skip(self, window))]
    pub async fn perform_sync(
        &self,
        connection_id: &str,
        window: SyncWindow,
    ) -> Result<SyncOutcome, SyncError> {
        let conn = self.store.connections().by_id(connection_id).await?;
        if conn.scheduled_for_deletion {
            info!("connection is scheduled for deletion, skipping");
            return Ok(SyncOutcome::Skipped(SkipReason::ScheduledForDeletion));
        }

        let lease = Duration::minutes(LEASE_TTL_MINUTES);
        if !self
            .store
            .connections()
            .acquire_lease(connection_id, Utc::now(), lease)
            .await?
        {
            info!("connection is already syncing, skipping");
            return Ok(SyncOutcome::Skipped(SkipReason::Leased));
        }

        let result = self.run(conn, window).await;

        if let Err(err) = self.store.connections().release_lease(connection_id).await {
            warn!(error = %err, "failed to release sync lease");
        }

        result.map(SyncOutcome::Synced)
    }

    /// Runs after a successful sync. Nothing to do yet.
    pub async fn perform_post_sync(&self, _connection_id: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn run(&self, mut conn: Connection, window: SyncWindow) -> Result<SyncReport, SyncError> {
        let today = Utc::now().date_naive();

        let (status, imported) =
            match importer::import(self.store, self.bank, &mut conn, &window).await? {
                ImportOutcome::Imported(status) => (status, true),
                ImportOutcome::Halted(status) => (status, false),
            };

        let linked = self.store.linked_accounts().by_connection(&conn.id).await?;

        let mut reconciled: Vec<(LinkedAccount, LedgerAccount)> = Vec::with_capacity(linked.len());
        for linked_account in linked {
            let ledger_account =
                account::reconcile(self.store, &conn.tenant_id, &linked_account, today).await?;
            reconciled.push((linked_account, ledger_account));
        }

        let mut entries = 0;
        let mut failed_accounts = Vec::new();
        for (linked_account, ledger_account) in &reconciled {
            match txn::reconcile(self.store, linked_account, ledger_account, today).await {
                Ok(count) => entries += count,
                Err(err) => {
                    self.reporter.report(&linked_account.id, &err);
                    failed_accounts.push(linked_account.id.clone());
                }
            }
        }

        let ledger_accounts: Vec<String> = reconciled.into_iter().map(|(_, a)| a.id).collect();
        for account_id in &ledger_accounts {
            self.queue.enqueue(Job::RecomputeBalances {
                account_id: account_id.clone(),
                window,
            })?;
        }

        info!(
            %status,
            imported,
            accounts = ledger_accounts.len(),
            entries,
            failed = failed_accounts.len(),
            "sync finished"
        );

        Ok(SyncReport {
            status,
            imported,
            ledger_accounts,
            entries,
            failed_accounts,
        })
    }
}
