use chrono::Utc;
use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{from_json, to_decimal, to_json, Error, Result, SqliteStore};
use crate::core::LinkedAccount;

#[derive(Iden)]
enum LinkedAccounts {
    Table,
    Id,
    ConnectionId,
    ExternalId,
    Iban,
    Name,
    OwnerName,
    Currency,
    AccountType,
    CurrentBalance,
    AvailableBalance,
    RawPayload,
    RawBalancesPayload,
    RawTransactionsPayload,
    CreatedAt,
}

const COLUMNS: [LinkedAccounts; 13] = [
    LinkedAccounts::Id,
    LinkedAccounts::ConnectionId,
    LinkedAccounts::ExternalId,
    LinkedAccounts::Iban,
    LinkedAccounts::Name,
    LinkedAccounts::OwnerName,
    LinkedAccounts::Currency,
    LinkedAccounts::AccountType,
    LinkedAccounts::CurrentBalance,
    LinkedAccounts::AvailableBalance,
    LinkedAccounts::RawPayload,
    LinkedAccounts::RawBalancesPayload,
    LinkedAccounts::RawTransactionsPayload,
];

const UPSERT: &str = r#"
INSERT INTO linked_accounts (
    id, connection_id, external_id, iban, name, owner_name, currency,
    account_type, current_balance, available_balance, raw_payload,
    raw_balances_payload, raw_transactions_payload, created_at, updated_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (external_id) DO UPDATE SET
    connection_id = excluded.connection_id,
    iban = excluded.iban,
    name = excluded.name,
    owner_name = excluded.owner_name,
    currency = excluded.currency,
    account_type = excluded.account_type,
    current_balance = excluded.current_balance,
    available_balance = excluded.available_balance,
    raw_payload = excluded.raw_payload,
    raw_balances_payload = excluded.raw_balances_payload,
    raw_transactions_payload = excluded.raw_transactions_payload,
    updated_at = excluded.updated_at
"#;

pub struct Store<'a>(&'a SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self(store)
    }

    pub async fn by_id(&self, id: &str) -> Result<LinkedAccount> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(LinkedAccounts::Table)
            .and_where(Expr::col(LinkedAccounts::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        match sqlx::query_with(&query, values)
            .fetch_optional(self.0.conn.as_ref())
            .await?
        {
            Some(row) => to_linked_account(&row),
            None => Err(Error::NotFound(format!("linked account {}", id))),
        }
    }

    pub async fn by_connection(&self, connection_id: &str) -> Result<Vec<LinkedAccount>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(LinkedAccounts::Table)
            .and_where(Expr::col(LinkedAccounts::ConnectionId).eq(connection_id))
            .order_by(LinkedAccounts::CreatedAt, Order::Asc)
            .order_by(LinkedAccounts::ExternalId, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(self.0.conn.as_ref())
            .await?;

        rows.iter().map(to_linked_account).collect()
    }
}

/// Looks an account up by the aggregator's id on an open connection or
/// transaction.
pub async fn by_external_id(
    conn: &mut SqliteConnection,
    external_id: &str,
) -> Result<Option<LinkedAccount>> {
    let (query, values) = Query::select()
        .columns(COLUMNS)
        .from(LinkedAccounts::Table)
        .and_where(Expr::col(LinkedAccounts::ExternalId).eq(external_id))
        .build_sqlx(SqliteQueryBuilder);

    sqlx::query_with(&query, values)
        .fetch_optional(conn)
        .await?
        .map(|row| to_linked_account(&row))
        .transpose()
}

/// Inserts the account or refreshes every synced field of the existing row
/// with the same external id. The stored id wins on conflict.
pub async fn upsert(conn: &mut SqliteConnection, account: &LinkedAccount) -> Result<()> {
    let now = Utc::now();

    sqlx::query(UPSERT)
        .bind(&account.id)
        .bind(&account.connection_id)
        .bind(&account.external_id)
        .bind(&account.iban)
        .bind(&account.name)
        .bind(&account.owner_name)
        .bind(&account.currency)
        .bind(&account.account_type)
        .bind(account.current_balance.map(|b| b.to_string()))
        .bind(account.available_balance.map(|b| b.to_string()))
        .bind(to_json(&account.raw_payload)?)
        .bind(to_json(&account.raw_balances_payload)?)
        .bind(to_json(&account.raw_transactions_payload)?)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await?;

    Ok(())
}

fn to_linked_account(row: &SqliteRow) -> Result<LinkedAccount> {
    let raw_payload: String = row.try_get("raw_payload")?;
    let raw_balances_payload: String = row.try_get("raw_balances_payload")?;
    let raw_transactions_payload: String = row.try_get("raw_transactions_payload")?;

    Ok(LinkedAccount {
        id: row.try_get("id")?,
        connection_id: row.try_get("connection_id")?,
        external_id: row.try_get("external_id")?,
        iban: row.try_get("iban")?,
        name: row.try_get("name")?,
        owner_name: row.try_get("owner_name")?,
        currency: row.try_get("currency")?,
        account_type: row.try_get("account_type")?,
        current_balance: to_decimal(row.try_get("current_balance")?)?,
        available_balance: to_decimal(row.try_get("available_balance")?)?,
        raw_payload: from_json(&raw_payload)?,
        raw_balances_payload: from_json(&raw_balances_payload)?,
        raw_transactions_payload: from_json(&raw_transactions_payload)?,
    })
}
