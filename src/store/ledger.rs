use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{to_decimal, Error, Result, SqliteStore};
use crate::core::{Accountable, Attribute, Category, EnrichmentSource, LedgerAccount, LedgerEntry};

/// Categories a tenant starts with, in matching order.
pub const DEFAULT_CATEGORIES: [&str; 15] = [
    "Income",
    "Loan Payments",
    "Fees",
    "Entertainment",
    "Food & Drink",
    "Groceries",
    "Shopping",
    "Home Improvement",
    "Healthcare",
    "Personal Care",
    "Services",
    "Gifts & Donations",
    "Transportation",
    "Travel",
    "Rent & Utilities",
];

pub const CURRENT_ANCHOR: &str = "current_anchor";

#[derive(Iden)]
enum LedgerAccounts {
    Table,
    Id,
    TenantId,
    LinkedAccountId,
    Name,
    Accountable,
    Subtype,
    Currency,
    Balance,
    CashBalance,
}

const ACCOUNT_COLUMNS: [LedgerAccounts; 9] = [
    LedgerAccounts::Id,
    LedgerAccounts::TenantId,
    LedgerAccounts::LinkedAccountId,
    LedgerAccounts::Name,
    LedgerAccounts::Accountable,
    LedgerAccounts::Subtype,
    LedgerAccounts::Currency,
    LedgerAccounts::Balance,
    LedgerAccounts::CashBalance,
];

#[derive(Iden)]
enum LedgerEntries {
    Table,
    Id,
    AccountId,
    DedupKey,
    Name,
    Amount,
    Currency,
    Date,
    CategoryId,
}

const ENTRY_COLUMNS: [LedgerEntries; 8] = [
    LedgerEntries::Id,
    LedgerEntries::AccountId,
    LedgerEntries::DedupKey,
    LedgerEntries::Name,
    LedgerEntries::Amount,
    LedgerEntries::Currency,
    LedgerEntries::Date,
    LedgerEntries::CategoryId,
];

#[derive(Iden)]
enum Categories {
    Table,
    Id,
    TenantId,
    Name,
    Position,
}

#[derive(Iden)]
enum Valuations {
    Table,
    AccountId,
    Kind,
    Date,
    Amount,
}

#[derive(Iden)]
enum Enrichments {
    Table,
    Entity,
    EntityId,
    Attribute,
    Source,
}

/// Pool-backed reads and user edits. The sync path works on an open
/// transaction through the free functions below.
pub struct Store<'a>(&'a SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self(store)
    }

    pub async fn accounts(&self, tenant_id: &str) -> Result<Vec<LedgerAccount>> {
        let (query, values) = Query::select()
            .columns(ACCOUNT_COLUMNS)
            .from(LedgerAccounts::Table)
            .and_where(Expr::col(LedgerAccounts::TenantId).eq(tenant_id))
            .order_by(LedgerAccounts::Name, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(self.0.conn.as_ref())
            .await?;

        rows.iter().map(to_ledger_account).collect()
    }

    pub async fn account(&self, id: &str) -> Result<LedgerAccount> {
        let mut conn = self.0.conn.acquire().await?;
        account_by_id(&mut conn, id).await
    }

    pub async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>> {
        let (query, values) = Query::select()
            .columns(ENTRY_COLUMNS)
            .from(LedgerEntries::Table)
            .and_where(Expr::col(LedgerEntries::AccountId).eq(account_id))
            .order_by(LedgerEntries::Date, Order::Desc)
            .order_by(LedgerEntries::DedupKey, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(self.0.conn.as_ref())
            .await?;

        rows.iter().map(to_ledger_entry).collect()
    }

    pub async fn categories(&self, tenant_id: &str) -> Result<Vec<Category>> {
        let mut conn = self.0.conn.acquire().await?;
        categories(&mut conn, tenant_id).await
    }

    /// The balance anchor recorded for an account, if any.
    pub async fn anchor(&self, account_id: &str) -> Result<Option<(NaiveDate, Decimal)>> {
        let (query, values) = Query::select()
            .columns([Valuations::Date, Valuations::Amount])
            .from(Valuations::Table)
            .and_where(Expr::col(Valuations::AccountId).eq(account_id))
            .and_where(Expr::col(Valuations::Kind).eq(CURRENT_ANCHOR))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_optional(self.0.conn.as_ref())
            .await?;

        match row {
            Some(row) => {
                let date: NaiveDate = row.try_get("date")?;
                let amount = to_decimal(row.try_get("amount")?)?.unwrap_or_default();
                Ok(Some((date, amount)))
            }
            None => Ok(None),
        }
    }

    /// Renames an account on the user's behalf. Later syncs leave the name
    /// alone.
    pub async fn rename_account(&self, id: &str, name: &str) -> Result<()> {
        let mut tx = self.0.begin().await?;
        account_by_id(&mut tx, id).await?;
        enrich(
            &mut tx,
            Attribute::AccountName,
            id,
            Some(name),
            EnrichmentSource::User,
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }
}

pub async fn account_by_id(conn: &mut SqliteConnection, id: &str) -> Result<LedgerAccount> {
    let (query, values) = Query::select()
        .columns(ACCOUNT_COLUMNS)
        .from(LedgerAccounts::Table)
        .and_where(Expr::col(LedgerAccounts::Id).eq(id))
        .build_sqlx(SqliteQueryBuilder);

    match sqlx::query_with(&query, values).fetch_optional(conn).await? {
        Some(row) => to_ledger_account(&row),
        None => Err(Error::NotFound(format!("ledger account {}", id))),
    }
}

/// Returns the ledger account fed by `linked_account_id`, creating it from
/// `template` when there is none yet.
pub async fn find_or_create_account(
    conn: &mut SqliteConnection,
    template: &LedgerAccount,
) -> Result<LedgerAccount> {
    let linked_account_id = template
        .linked_account_id
        .as_deref()
        .ok_or_else(|| Error::Corrupt(format!("ledger account {} is not linked", template.id)))?;

    sqlx::query(
        r#"
        INSERT INTO ledger_accounts (id, tenant_id, linked_account_id, name, accountable, subtype, currency, balance, cash_balance)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (linked_account_id) DO NOTHING
        "#,
    )
    .bind(&template.id)
    .bind(&template.tenant_id)
    .bind(linked_account_id)
    .bind(&template.name)
    .bind(template.accountable.as_str())
    .bind(&template.subtype)
    .bind(&template.currency)
    .bind(template.balance.to_string())
    .bind(template.cash_balance.to_string())
    .execute(&mut *conn)
    .await?;

    let (query, values) = Query::select()
        .columns(ACCOUNT_COLUMNS)
        .from(LedgerAccounts::Table)
        .and_where(Expr::col(LedgerAccounts::LinkedAccountId).eq(linked_account_id))
        .build_sqlx(SqliteQueryBuilder);

    let row = sqlx::query_with(&query, values).fetch_one(conn).await?;

    to_ledger_account(&row)
}

/// Writes the synced, non-enrichable fields of a ledger account.
pub async fn update_account_balance(
    conn: &mut SqliteConnection,
    id: &str,
    accountable: Accountable,
    currency: &str,
    balance: Decimal,
) -> Result<()> {
    let (query, values) = Query::update()
        .table(LedgerAccounts::Table)
        .values(vec![
            (LedgerAccounts::Accountable, accountable.as_str().into()),
            (LedgerAccounts::Currency, currency.into()),
            (LedgerAccounts::Balance, balance.to_string().into()),
            (LedgerAccounts::CashBalance, balance.to_string().into()),
        ])
        .and_where(Expr::col(LedgerAccounts::Id).eq(id))
        .build_sqlx(SqliteQueryBuilder);

    sqlx::query_with(&query, values).execute(conn).await?;

    Ok(())
}

/// Records the balance anchor for `account_id`, replacing the previous one.
pub async fn upsert_anchor(
    conn: &mut SqliteConnection,
    account_id: &str,
    date: NaiveDate,
    amount: Decimal,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO valuations (id, account_id, kind, date, amount)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (account_id, kind) DO UPDATE SET
            date = excluded.date,
            amount = excluded.amount
        "#,
    )
    .bind(ulid::Ulid::new().to_string())
    .bind(account_id)
    .bind(CURRENT_ANCHOR)
    .bind(date)
    .bind(amount.to_string())
    .execute(conn)
    .await?;

    Ok(())
}

/// The source currently holding `attribute` of `entity_id`.
pub async fn claimed_by(
    conn: &mut SqliteConnection,
    attribute: Attribute,
    entity_id: &str,
) -> Result<Option<EnrichmentSource>> {
    let (entity, column) = attribute.target();
    let (query, values) = Query::select()
        .column(Enrichments::Source)
        .from(Enrichments::Table)
        .and_where(Expr::col(Enrichments::Entity).eq(entity))
        .and_where(Expr::col(Enrichments::EntityId).eq(entity_id))
        .and_where(Expr::col(Enrichments::Attribute).eq(column))
        .build_sqlx(SqliteQueryBuilder);

    let row = sqlx::query_with(&query, values).fetch_optional(conn).await?;

    match row {
        Some(row) => {
            let source: String = row.try_get("source")?;
            source
                .parse()
                .map(Some)
                .map_err(|_| Error::Corrupt(format!("enrichment source {}", source)))
        }
        None => Ok(None),
    }
}

/// Writes `value` into `attribute` unless a higher-priority source already
/// claimed it. Returns whether the write happened.
pub async fn enrich(
    conn: &mut SqliteConnection,
    attribute: Attribute,
    entity_id: &str,
    value: Option<&str>,
    source: EnrichmentSource,
) -> Result<bool> {
    if let Some(claimed) = claimed_by(&mut *conn, attribute, entity_id).await? {
        if claimed > source {
            return Ok(false);
        }
    }

    let (entity, column) = attribute.target();
    sqlx::query(&format!("UPDATE {} SET {} = ? WHERE id = ?", entity, column))
        .bind(value)
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO enrichments (entity, entity_id, attribute, source)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (entity, entity_id, attribute) DO UPDATE SET source = excluded.source
        "#,
    )
    .bind(entity)
    .bind(entity_id)
    .bind(column)
    .bind(source.as_str())
    .execute(conn)
    .await?;

    Ok(true)
}

pub async fn categories(conn: &mut SqliteConnection, tenant_id: &str) -> Result<Vec<Category>> {
    let (query, values) = Query::select()
        .columns([Categories::Id, Categories::Name])
        .from(Categories::Table)
        .and_where(Expr::col(Categories::TenantId).eq(tenant_id))
        .order_by(Categories::Position, Order::Asc)
        .build_sqlx(SqliteQueryBuilder);

    let rows = sqlx::query_with(&query, values).fetch_all(conn).await?;

    rows.iter()
        .map(|row| {
            Ok(Category {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })
        })
        .collect()
}

/// Returns the tenant's categories, seeding the defaults when it has none.
pub async fn bootstrap_categories(
    conn: &mut SqliteConnection,
    tenant_id: &str,
) -> Result<Vec<Category>> {
    let existing = categories(&mut *conn, tenant_id).await?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    for (position, name) in DEFAULT_CATEGORIES.iter().enumerate() {
        let (query, values) = Query::insert()
            .into_table(Categories::Table)
            .columns([
                Categories::Id,
                Categories::TenantId,
                Categories::Name,
                Categories::Position,
            ])
            .values_panic(vec![
                ulid::Ulid::new().to_string().into(),
                tenant_id.into(),
                (*name).into(),
                (position as i64).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values).execute(&mut *conn).await?;
    }

    categories(conn, tenant_id).await
}

/// Returns the entry keyed by `(template.account_id, template.dedup_key)`,
/// creating it from `template` when missing.
pub async fn find_or_create_entry(
    conn: &mut SqliteConnection,
    template: &LedgerEntry,
) -> Result<LedgerEntry> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (id, account_id, dedup_key, name, amount, currency, date, category_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (account_id, dedup_key) DO NOTHING
        "#,
    )
    .bind(&template.id)
    .bind(&template.account_id)
    .bind(&template.dedup_key)
    .bind(&template.name)
    .bind(template.amount.to_string())
    .bind(&template.currency)
    .bind(template.date)
    .bind(&template.category_id)
    .execute(&mut *conn)
    .await?;

    let (query, values) = Query::select()
        .columns(ENTRY_COLUMNS)
        .from(LedgerEntries::Table)
        .and_where(Expr::col(LedgerEntries::AccountId).eq(template.account_id.as_str()))
        .and_where(Expr::col(LedgerEntries::DedupKey).eq(template.dedup_key.as_str()))
        .build_sqlx(SqliteQueryBuilder);

    let row = sqlx::query_with(&query, values).fetch_one(conn).await?;

    to_ledger_entry(&row)
}

/// Writes the synced, non-enrichable fields of an entry.
pub async fn update_entry(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<()> {
    let (query, values) = Query::update()
        .table(LedgerEntries::Table)
        .values(vec![
            (LedgerEntries::Amount, entry.amount.to_string().into()),
            (LedgerEntries::Currency, entry.currency.as_str().into()),
            (LedgerEntries::Date, entry.date.into()),
        ])
        .and_where(Expr::col(LedgerEntries::Id).eq(entry.id.as_str()))
        .build_sqlx(SqliteQueryBuilder);

    sqlx::query_with(&query, values).execute(conn).await?;

    Ok(())
}

fn to_ledger_account(row: &SqliteRow) -> Result<LedgerAccount> {
    let accountable: String = row.try_get("accountable")?;

    Ok(LedgerAccount {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        linked_account_id: row.try_get("linked_account_id")?,
        name: row.try_get("name")?,
        accountable: accountable
            .parse()
            .map_err(|_| Error::Corrupt(format!("accountable {}", accountable)))?,
        subtype: row.try_get("subtype")?,
        currency: row.try_get("currency")?,
        balance: to_decimal(row.try_get("balance")?)?.unwrap_or_default(),
        cash_balance: to_decimal(row.try_get("cash_balance")?)?.unwrap_or_default(),
    })
}

fn to_ledger_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        dedup_key: row.try_get("dedup_key")?,
        name: row.try_get("name")?,
        amount: to_decimal(row.try_get("amount")?)?.unwrap_or_default(),
        currency: row.try_get("currency")?,
        date: row.try_get("date")?,
        category_id: row.try_get("category_id")?,
    })
}
