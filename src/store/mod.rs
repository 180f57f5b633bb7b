pub(crate) mod account;
pub(crate) mod connection;
pub(crate) mod ledger;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Error as SqlxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Database(#[from] SqlxError),
    #[error(transparent)]
    Decimal(#[from] rust_decimal::Error),
}

pub(crate) type Result<T> = ::std::result::Result<T, Error>;

pub type Transaction = sqlx::Transaction<'static, Sqlite>;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<sqlx::pool::Pool<Sqlite>>,
}

impl SqliteStore {
    pub async fn new(uri: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(uri)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database is a different
        // database, so those pools are pinned to a single connection.
        let pool_opts = if uri.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new()
        };
        let pool = pool_opts.connect_with(opts).await?;

        let mut conn = pool.acquire().await?;
        sqlx::migrate!("./migrations").run(&mut conn).await?;

        Ok(Self {
            conn: Arc::new(pool),
        })
    }

    pub async fn begin(&self) -> Result<Transaction> {
        Ok(self.conn.begin().await?)
    }

    pub fn connections(&self) -> connection::Store<'_> {
        connection::Store::new(self)
    }

    pub fn linked_accounts(&self) -> account::Store<'_> {
        account::Store::new(self)
    }

    pub fn ledger(&self) -> ledger::Store<'_> {
        ledger::Store::new(self)
    }
}

pub(crate) fn to_json(value: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json(raw: &str) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(raw)?)
}

pub(crate) fn to_decimal(raw: Option<String>) -> Result<Option<Decimal>> {
    raw.map(|s| Decimal::from_str(&s)).transpose().map_err(Error::from)
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;

    use crate::core::Connection;

    use super::SqliteStore;

    pub(crate) struct TestStore {
        store: SqliteStore,
    }

    impl TestStore {
        pub(crate) async fn new() -> Self {
            TestStore {
                store: SqliteStore::new("sqlite::memory:").await.unwrap(),
            }
        }

        pub(crate) async fn new_connection(&self, requisition_id: &str) -> Connection {
            let conn = Connection::linked("tenant", requisition_id, "BANK_ID", "Test Bank", Utc::now());
            self.store.connections().save(&conn).await.unwrap();

            conn
        }

        pub(crate) fn db(&self) -> &SqliteStore {
            &self.store
        }
    }

    #[tokio::test]
    async fn migrations_apply_to_fresh_database() {
        let store = TestStore::new().await;

        assert!(store.db().connections().list().await.unwrap().is_empty());
    }
}
