use std::str::FromStr;

use chrono::NaiveDate;
use gocardless::model::Transaction;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::category::CategoryMatcher;
use super::SyncError;
use crate::core::{Attribute, EnrichmentSource, LedgerAccount, LedgerEntry, LinkedAccount};
use crate::store::{ledger, SqliteStore};

const FALLBACK_NAME: &str = "Transaction";

/// A booked transaction resolved into ledger terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Booked {
    pub dedup_key: String,
    pub name: String,
    pub amount: Decimal,
    pub currency: String,
    pub date: NaiveDate,
}

impl Booked {
    pub fn resolve(
        linked: &LinkedAccount,
        tx: &Transaction,
        today: NaiveDate,
    ) -> Result<Self, SyncError> {
        let name = display_name(tx);
        let date = booking_date(tx, today)?;
        let raw_amount = tx
            .transaction_amount
            .as_ref()
            .map(|a| a.amount.as_str())
            .unwrap_or_default();

        Ok(Self {
            dedup_key: dedup_key(&linked.external_id, tx, date, raw_amount, &name),
            amount: -parse_amount(raw_amount)?,
            currency: tx
                .transaction_amount
                .as_ref()
                .and_then(|a| a.currency.clone())
                .unwrap_or_else(|| linked.currency.clone()),
            name,
            date,
        })
    }
}

/// The aggregator's id for the transaction, else a stable hash of what
/// identifies it.
pub fn dedup_key(
    external_account_id: &str,
    tx: &Transaction,
    date: NaiveDate,
    raw_amount: &str,
    name: &str,
) -> String {
    if let Some(id) = tx.transaction_id.as_ref().or(tx.internal_transaction_id.as_ref()) {
        return id.clone();
    }

    let data = format!(
        "{}-{}-{}-{}",
        external_account_id,
        date.format("%Y-%m-%d"),
        raw_amount,
        name
    );
    let mut hex = hex::encode(Sha256::digest(data.as_bytes()));
    hex.truncate(32);
    hex
}

pub fn display_name(tx: &Transaction) -> String {
    tx.remittance_information_unstructured
        .as_ref()
        .or_else(|| tx.remittance_information_unstructured_array.first())
        .or(tx.creditor_name.as_ref())
        .or(tx.debtor_name.as_ref())
        .cloned()
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

fn booking_date(tx: &Transaction, today: NaiveDate) -> Result<NaiveDate, SyncError> {
    match tx.booking_date.as_deref().or(tx.value_date.as_deref()) {
        Some(raw) => raw
            .get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
            .ok_or_else(|| SyncError::InvalidDate(raw.to_string())),
        None => Ok(today),
    }
}

/// Parses a signed decimal as sent by the bank. A missing amount is zero.
pub fn parse_amount(raw: &str) -> Result<Decimal, SyncError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }

    Decimal::from_str(raw.strip_prefix('+').unwrap_or(raw))
        .map_err(|_| SyncError::InvalidAmount(raw.to_string()))
}

/// Imports the booked transactions of the stored snapshot into `account`.
/// Each transaction is written in its own database transaction.
#[tracing::instrument(skip_all, fields(linked_account_id = %linked.id, account_id = %account.id))]
pub async fn reconcile(
    store: &SqliteStore,
    linked: &LinkedAccount,
    account: &LedgerAccount,
    today: NaiveDate,
) -> Result<usize, SyncError> {
    let booked = booked_records(&linked.raw_transactions_payload);
    if booked.is_empty() {
        debug!("no booked transactions in snapshot");
        return Ok(0);
    }

    let categories = {
        let mut tx = store.begin().await?;
        let categories = ledger::bootstrap_categories(&mut tx, &account.tenant_id).await?;
        tx.commit().await?;
        categories
    };
    let matcher = CategoryMatcher::new(&categories);

    for record in &booked {
        let remote = Transaction::deserialize(record)?;
        let resolved = Booked::resolve(linked, &remote, today)?;
        process_entry(store, account, resolved, &matcher).await?;
    }

    info!(count = booked.len(), "imported booked transactions");

    Ok(booked.len())
}

/// Booked records of a stored transactions body, left undecoded so each is
/// checked on its own when it is imported.
fn booked_records(raw: &Value) -> Vec<Value> {
    raw.pointer("/transactions/booked")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

async fn process_entry(
    store: &SqliteStore,
    account: &LedgerAccount,
    booked: Booked,
    matcher: &CategoryMatcher<'_>,
) -> Result<(), SyncError> {
    let mut tx = store.begin().await?;

    let mut entry = ledger::find_or_create_entry(
        &mut tx,
        &LedgerEntry {
            id: ulid::Ulid::new().to_string(),
            account_id: account.id.clone(),
            dedup_key: booked.dedup_key,
            name: booked.name.clone(),
            amount: booked.amount,
            currency: booked.currency.clone(),
            date: booked.date,
            category_id: None,
        },
    )
    .await?;

    entry.amount = booked.amount;
    entry.currency = booked.currency;
    entry.date = booked.date;
    ledger::update_entry(&mut tx, &entry).await?;

    ledger::enrich(
        &mut tx,
        Attribute::EntryName,
        &entry.id,
        Some(&booked.name),
        EnrichmentSource::BankSync,
    )
    .await?;

    let claimed = ledger::claimed_by(&mut tx, Attribute::EntryCategory, &entry.id).await?;
    if claimed.map_or(true, |source| source <= EnrichmentSource::BankSync) {
        if let Some(category) = matcher.find(&booked.name) {
            ledger::enrich(
                &mut tx,
                Attribute::EntryCategory,
                &entry.id,
                Some(&category.id),
                EnrichmentSource::BankSync,
            )
            .await?;
        }
    }

    tx.commit().await?;

    Ok(())
}
