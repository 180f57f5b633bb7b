use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use gocardless::model::{Institution, NewAgreement, NewRequisition};
use gocardless::{Recovery, ACCESS_SCOPE, ACCESS_VALID_FOR_DAYS, MAX_TRANSACTION_DAYS};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::Connection;
use crate::jobs::{JobQueue, QueueError};
use crate::store::SqliteStore;
use crate::upstream::BankData;
use crate::{required, App};

/// Countries the aggregator serves.
pub const SUPPORTED_COUNTRIES: [&str; 29] = [
    "AT", "BE", "BG", "CY", "CZ", "DE", "DK", "EE", "ES", "FI", "FR", "GB", "GR", "HR", "HU", "IE",
    "IT", "LT", "LU", "LV", "MT", "NL", "NO", "PL", "PT", "RO", "SE", "SI", "SK",
];

const USER_LANGUAGE: &str = "EN";

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("country {0} is not supported")]
    UnsupportedCountry(String),
    #[error("requisition {0} has no institution, pass one explicitly")]
    UnknownInstitution(String),
    #[error("aggregator returned no consent link for requisition {0}")]
    MissingConsentLink(String),
    #[error(transparent)]
    Remote(#[from] gocardless::Error),
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A consent flow the user still has to finish in the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub requisition_id: String,
    pub agreement_id: String,
    pub reference: String,
    /// Where to send the user.
    pub link: String,
}

pub struct LinkController<'a> {
    store: &'a SqliteStore,
    bank: &'a dyn BankData,
    queue: &'a dyn JobQueue,
    tenant_id: &'a str,
    redirect_url: &'a str,
}

impl<'a> LinkController<'a> {
    pub fn new(
        store: &'a SqliteStore,
        bank: &'a dyn BankData,
        queue: &'a dyn JobQueue,
        tenant_id: &'a str,
        redirect_url: &'a str,
    ) -> Self {
        Self {
            store,
            bank,
            queue,
            tenant_id,
            redirect_url,
        }
    }

    pub async fn list_institutions(&self, country: &str) -> Result<Vec<Institution>, LinkError> {
        let country = country.to_ascii_uppercase();
        if !SUPPORTED_COUNTRIES.contains(&country.as_str()) {
            return Err(LinkError::UnsupportedCountry(country));
        }

        Ok(self.bank.institutions(&country).await?)
    }

    /// Creates the end-user agreement and the requisition for a new link.
    pub async fn start_link(
        &self,
        institution_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingLink, LinkError> {
        let agreement = self
            .bank
            .create_agreement(&NewAgreement {
                institution_id,
                max_historical_days: MAX_TRANSACTION_DAYS as u32,
                access_valid_for_days: ACCESS_VALID_FOR_DAYS,
                access_scope: &ACCESS_SCOPE,
            })
            .await?;

        let reference = format!("banklink_{}_{}", self.tenant_id, now.timestamp());
        let requisition = self
            .bank
            .create_requisition(&NewRequisition {
                institution_id,
                redirect_url: self.redirect_url,
                reference: &reference,
                user_language: USER_LANGUAGE,
                agreement_id: Some(&agreement.id),
            })
            .await?;

        let link = requisition
            .link
            .ok_or_else(|| LinkError::MissingConsentLink(requisition.id.clone()))?;

        info!(requisition_id = %requisition.id, %institution_id, "started bank link");

        Ok(PendingLink {
            requisition_id: requisition.id,
            agreement_id: agreement.id,
            reference,
            link,
        })
    }

    /// Records the connection for a consent the user finished and queues its
    /// first sync. Completing the same requisition twice returns the existing
    /// connection.
    pub async fn complete_link(
        &self,
        requisition_id: &str,
        institution_id: Option<&str>,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Connection, LinkError> {
        if let Some(existing) = self
            .store
            .connections()
            .by_requisition(requisition_id)
            .await?
        {
            return Ok(existing);
        }

        // The first sync refreshes all of this, so lookups here may fail.
        let requisition = match self.bank.requisition(requisition_id).await {
            Ok(requisition) => Some(requisition),
            Err(err) => {
                warn!(%requisition_id, error = %err, "failed to fetch requisition");
                None
            }
        };

        let institution_id = institution_id
            .map(str::to_string)
            .or_else(|| requisition.and_then(|r| r.institution_id))
            .ok_or_else(|| LinkError::UnknownInstitution(requisition_id.to_string()))?;

        let name = match name {
            Some(name) => name.to_string(),
            None => match self.bank.institution(&institution_id).await {
                Ok(institution) => institution.name.unwrap_or_else(|| institution_id.clone()),
                Err(err) => {
                    warn!(%institution_id, error = %err, "failed to fetch institution");
                    institution_id.clone()
                }
            },
        };

        let conn = Connection::linked(self.tenant_id, requisition_id, &institution_id, &name, now);
        self.store.connections().save(&conn).await?;
        self.queue.enqueue_sync(&conn.id)?;

        info!(connection_id = %conn.id, %requisition_id, "linked bank connection");

        Ok(conn)
    }

    /// Starts a fresh consent for an existing connection.
    pub async fn start_reconnect(
        &self,
        connection_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingLink, LinkError> {
        let conn = self.store.connections().by_id(connection_id).await?;

        self.start_link(&conn.institution_id, now).await
    }

    /// Points the existing connection at the new requisition and resyncs it.
    pub async fn complete_reconnect(
        &self,
        connection_id: &str,
        requisition_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Connection, LinkError> {
        let mut conn = self.store.connections().by_id(connection_id).await?;
        conn.reconnect(requisition_id, now);
        self.store.connections().update(&conn).await?;
        self.queue.enqueue_sync(&conn.id)?;

        info!(connection_id = %conn.id, %requisition_id, "reconnected bank connection");

        Ok(conn)
    }

    /// Hides the connection right away; the remote side is revoked later by
    /// a teardown job.
    pub async fn destroy_later(&self, connection_id: &str) -> Result<(), LinkError> {
        self.store.connections().mark_for_deletion(connection_id).await?;
        self.queue.enqueue_teardown(connection_id)?;

        Ok(())
    }
}

/// Revokes the connection's requisition and deletes it locally. A
/// requisition the aggregator no longer knows counts as revoked.
#[tracing::instrument(skip(store, bank))]
pub async fn teardown(
    store: &SqliteStore,
    bank: &dyn BankData,
    connection_id: &str,
) -> Result<(), LinkError> {
    let conn = match store.connections().find(connection_id).await? {
        Some(conn) => conn,
        None => {
            info!("connection already deleted");
            return Ok(());
        }
    };

    match bank.delete_requisition(&conn.requisition_id).await {
        Ok(()) => {}
        Err(err) if err.recovery() == Recovery::AlreadyGone => {
            info!(requisition_id = %conn.requisition_id, "requisition already gone");
        }
        Err(err) => return Err(err.into()),
    }

    store.connections().delete(&conn.id).await?;
    info!("deleted connection");

    Ok(())
}

pub(crate) async fn institutions(matches: &ArgMatches, app: &App) -> Result<()> {
    let country = required(matches, "country")?;
    let institutions = app.links()?.list_institutions(country).await?;

    println!("{}", crate::display::institutions_table(&institutions)?);

    Ok(())
}

pub(crate) async fn run(matches: &ArgMatches, app: &App) -> Result<()> {
    let now = Utc::now();

    match matches.subcommand() {
        Some(("start", start_matches)) => {
            let institution = required(start_matches, "institution")?;
            let pending = app.links()?.start_link(institution, now).await?;
            print_pending(&pending);
        }
        Some(("complete", complete_matches)) => {
            let requisition = required(complete_matches, "requisition_id")?;
            let conn = app
                .links()?
                .complete_link(
                    requisition,
                    complete_matches.value_of("institution"),
                    complete_matches.value_of("name"),
                    now,
                )
                .await?;
            println!("Linked {} ({}).", conn.name, conn.id);
        }
        Some(("reconnect", reconnect_matches)) => {
            let connection_id = required(reconnect_matches, "connection_id")?;
            match reconnect_matches.value_of("requisition") {
                Some(requisition) => {
                    let conn = app
                        .links()?
                        .complete_reconnect(connection_id, requisition, now)
                        .await?;
                    println!("Reconnected {} ({}).", conn.name, conn.id);
                }
                None => {
                    let pending = app.links()?.start_reconnect(connection_id, now).await?;
                    print_pending(&pending);
                }
            }
        }
        Some(("status", _)) => {
            let conns = app.store.connections().list().await?;
            println!("{}", crate::display::connections_table(&conns, now)?);

            for conn in app.store.connections().needs_reauth().await? {
                println!(
                    "{} needs a new consent, run `link reconnect {}`.",
                    conn.name, conn.id
                );
            }
        }
        Some(("delete", delete_matches)) => {
            let connection_id = required(delete_matches, "connection_id")?;
            app.links()?.destroy_later(connection_id).await?;
            println!("Connection {} scheduled for removal.", connection_id);
        }
        _ => return Err(anyhow!("unknown link command")),
    }

    app.finish().await
}

fn print_pending(pending: &PendingLink) {
    println!("Visit {} to grant access.", pending.link);
    println!(
        "Then run `link complete {}` (reference {}).",
        pending.requisition_id, pending.reference
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::ConnectionStatus;
    use crate::jobs::{Job, LocalQueue};
    use crate::store::tests::TestStore;
    use crate::sync::SyncWindow;
    use crate::upstream::fake::FakeBank;

    const REDIRECT: &str = "http://localhost:4545/callback";

    fn controller<'a>(
        store: &'a TestStore,
        bank: &'a FakeBank,
        queue: &'a LocalQueue,
    ) -> LinkController<'a> {
        LinkController::new(store.db(), bank, queue, "tenant", REDIRECT)
    }

    #[tokio::test]
    async fn rejects_unsupported_countries() {
        let store = TestStore::new().await;
        let bank = FakeBank::new().with_institution("MONZO_GB", "Monzo");
        let queue = LocalQueue::new();
        let links = controller(&store, &bank, &queue);

        assert!(matches!(
            links.list_institutions("US").await,
            Err(LinkError::UnsupportedCountry(_))
        ));
        let found = links.list_institutions("gb").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "MONZO_GB");
    }

    #[tokio::test]
    async fn start_link_creates_agreement_then_requisition() {
        let store = TestStore::new().await;
        let bank = FakeBank::new();
        let queue = LocalQueue::new();
        let now = Utc::now();

        let pending = controller(&store, &bank, &queue)
            .start_link("MONZO_GB", now)
            .await
            .unwrap();

        assert_eq!(pending.reference, format!("banklink_tenant_{}", now.timestamp()));
        assert!(pending.link.contains(&pending.requisition_id));
        assert_eq!(bank.calls("create_agreement"), 1);
        assert_eq!(bank.calls("create_requisition"), 1);

        let requisition = bank.requisition(&pending.requisition_id).await.unwrap();
        assert_eq!(requisition.agreement.as_deref(), Some(pending.agreement_id.as_str()));
    }

    #[tokio::test]
    async fn complete_link_creates_one_connection_and_queues_sync() {
        let store = TestStore::new().await;
        let bank = FakeBank::new()
            .with_institution("BANK_ID", "Monzo")
            .with_requisition("req_9", "LN", &["acc_1"]);
        let queue = LocalQueue::new();
        let links = controller(&store, &bank, &queue);

        let conn = links.complete_link("req_9", None, None, Utc::now()).await.unwrap();
        let again = links.complete_link("req_9", None, None, Utc::now()).await.unwrap();

        assert_eq!(conn.id, again.id);
        assert_eq!(conn.name, "Monzo");
        assert_eq!(conn.institution_id, "BANK_ID");
        assert_eq!(conn.status, ConnectionStatus::Linked);
        assert_eq!(store.db().connections().list().await.unwrap().len(), 1);
        assert_eq!(
            queue.drain(),
            vec![Job::Sync {
                connection_id: conn.id,
                window: SyncWindow::default(),
            }]
        );
    }

    #[tokio::test]
    async fn complete_link_needs_an_institution() {
        let store = TestStore::new().await;
        let bank = FakeBank::new();
        let queue = LocalQueue::new();

        let err = controller(&store, &bank, &queue)
            .complete_link("req_missing", None, None, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, LinkError::UnknownInstitution(_)));
    }

    #[tokio::test]
    async fn reconnect_reuses_the_connection() {
        let store = TestStore::new().await;
        let bank = FakeBank::new();
        let queue = LocalQueue::new();
        let conn = store.new_connection("req_old").await;
        store
            .db()
            .connections()
            .set_status(&conn.id, ConnectionStatus::Expired)
            .await
            .unwrap();
        let links = controller(&store, &bank, &queue);

        let pending = links.start_reconnect(&conn.id, Utc::now()).await.unwrap();
        let updated = links
            .complete_reconnect(&conn.id, &pending.requisition_id, Utc::now())
            .await
            .unwrap();

        let all = store.db().connections().list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, conn.id);
        assert_eq!(all[0].requisition_id, pending.requisition_id);
        assert_eq!(all[0].status, ConnectionStatus::Linked);
        assert!(!updated.is_access_expiring_soon(Utc::now()));
        assert_eq!(queue.drain().len(), 1);
    }

    #[tokio::test]
    async fn delete_hides_first_and_tears_down_later() {
        let store = TestStore::new().await;
        let bank = FakeBank::new().with_requisition("req_1", "LN", &[]);
        let queue = LocalQueue::new();
        let conn = store.new_connection("req_1").await;

        controller(&store, &bank, &queue)
            .destroy_later(&conn.id)
            .await
            .unwrap();

        assert!(store.db().connections().active().await.unwrap().is_empty());
        assert_eq!(
            queue.drain(),
            vec![Job::Teardown {
                connection_id: conn.id.clone(),
            }]
        );

        teardown(store.db(), &bank, &conn.id).await.unwrap();

        assert_eq!(bank.calls("delete_requisition:req_1"), 1);
        assert!(store.db().connections().find(&conn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn teardown_tolerates_missing_requisition() {
        let store = TestStore::new().await;
        let bank = FakeBank::new();
        let conn = store.new_connection("req_gone").await;

        teardown(store.db(), &bank, &conn.id).await.unwrap();

        assert!(store.db().connections().find(&conn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn teardown_keeps_connection_when_revocation_fails() {
        let store = TestStore::new().await;
        let bank = FakeBank::new().with_requisition("req_1", "LN", &[]);
        bank.fail("delete_requisition:req_1", 500, json!({"detail": "try later"}));
        let conn = store.new_connection("req_1").await;

        assert!(teardown(store.db(), &bank, &conn.id).await.is_err());
        assert!(store.db().connections().find(&conn.id).await.unwrap().is_some());
    }
}
