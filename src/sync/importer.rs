use std::str::FromStr;

use gocardless::model::{AccountDetails, Balance, Balances, Requisition, Snapshot, Transactions};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{SyncError, SyncWindow};
use crate::core::{Connection, ConnectionStatus, LinkedAccount};
use crate::store::{account, SqliteStore};
use crate::upstream::{BankData, RemoteResult};

const DEFAULT_ACCOUNT_NAME: &str = "Account";
const DEFAULT_CURRENCY: &str = "EUR";

const CURRENT_BALANCE_TYPES: [&str; 2] = ["closingBooked", "expected"];
const AVAILABLE_BALANCE_TYPES: [&str; 2] = ["interimAvailable", "available"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Snapshots were refreshed; the connection is in the given state.
    Imported(ConnectionStatus),
    /// The aggregator refused access and the connection was forced into the
    /// given state. Stored snapshots are unchanged.
    Halted(ConnectionStatus),
}

/// What the aggregator returned for one account. Each part failed or
/// succeeded on its own.
#[derive(Debug)]
pub struct AccountSnapshot {
    pub external_id: String,
    pub details: RemoteResult<Snapshot<AccountDetails>>,
    pub balances: RemoteResult<Snapshot<Balances>>,
    pub transactions: RemoteResult<Snapshot<Transactions>>,
}

impl AccountSnapshot {
    pub async fn fetch(bank: &dyn BankData, external_id: &str, window: &SyncWindow) -> Self {
        Self {
            external_id: external_id.to_string(),
            details: bank.account_details(external_id).await,
            balances: bank.account_balances(external_id).await,
            transactions: bank
                .account_transactions(external_id, window.start, window.end)
                .await,
        }
    }

    /// Folds the snapshot into the stored account. Raw bodies are stored as
    /// received. Parts that failed to fetch leave the stored values alone,
    /// so a failed details fetch keeps the known name and currency rather
    /// than resetting them to the defaults.
    pub fn apply(self, connection_id: &str, existing: Option<LinkedAccount>) -> LinkedAccount {
        let mut account = existing.unwrap_or_else(|| LinkedAccount {
            id: ulid::Ulid::new().to_string(),
            connection_id: connection_id.to_string(),
            external_id: self.external_id.clone(),
            iban: None,
            name: DEFAULT_ACCOUNT_NAME.to_string(),
            owner_name: None,
            currency: DEFAULT_CURRENCY.to_string(),
            account_type: None,
            current_balance: None,
            available_balance: None,
            raw_payload: Value::Object(Default::default()),
            raw_balances_payload: Value::Object(Default::default()),
            raw_transactions_payload: Value::Object(Default::default()),
        });
        account.connection_id = connection_id.to_string();

        match self.details {
            Ok(Snapshot { raw, typed: details }) => {
                account.raw_payload = raw;
                account.name = details
                    .name
                    .clone()
                    .or_else(|| details.iban.clone())
                    .unwrap_or_else(|| DEFAULT_ACCOUNT_NAME.to_string());
                account.currency = details
                    .currency
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
                account.iban = details.iban;
                account.owner_name = details.owner_name;
                account.account_type = details.cash_account_type;
            }
            Err(err) => degraded(&self.external_id, "details", &err),
        }

        match self.balances {
            Ok(Snapshot { raw, typed: balances }) => {
                account.raw_balances_payload = raw;
                account.current_balance = pick_balance(&balances, &CURRENT_BALANCE_TYPES, true)
                    .map(|b| round_to_currency(b, &account.currency));
                account.available_balance =
                    pick_balance(&balances, &AVAILABLE_BALANCE_TYPES, false)
                        .map(|b| round_to_currency(b, &account.currency));
            }
            Err(err) => degraded(&self.external_id, "balances", &err),
        }

        match self.transactions {
            Ok(Snapshot { raw, .. }) => account.raw_transactions_payload = raw,
            Err(err) => degraded(&self.external_id, "transactions", &err),
        }

        account
    }
}

fn degraded(external_id: &str, part: &str, err: &gocardless::Error) {
    let code = err.code();
    warn!(
        %external_id,
        part,
        code = code.as_deref().unwrap_or("-"),
        error = %err,
        "failed to fetch account data, keeping stored values"
    );
}

/// Refreshes the connection's snapshots and the linked accounts under it.
///
/// Access errors from the aggregator move the connection to expired or
/// suspended and end the import without an error. Anything else is returned.
#[tracing::instrument(skip_all, fields(connection_id = %conn.id))]
pub async fn import(
    store: &SqliteStore,
    bank: &dyn BankData,
    conn: &mut Connection,
    window: &SyncWindow,
) -> Result<ImportOutcome, SyncError> {
    match import_snapshots(store, bank, conn, window).await {
        Ok(()) => Ok(ImportOutcome::Imported(conn.status)),
        Err(SyncError::Remote(err)) => match ConnectionStatus::after_failure(&err) {
            Some(status) => {
                let code = err.code();
                warn!(
                    %status,
                    code = code.as_deref().unwrap_or("-"),
                    error = %err,
                    "aggregator refused access"
                );
                store.connections().set_status(&conn.id, status).await?;
                conn.status = status;

                Ok(ImportOutcome::Halted(status))
            }
            None => Err(SyncError::Remote(err)),
        },
        Err(err) => Err(err),
    }
}

async fn import_snapshots(
    store: &SqliteStore,
    bank: &dyn BankData,
    conn: &mut Connection,
    window: &SyncWindow,
) -> Result<(), SyncError> {
    let requisition = import_requisition(store, bank, conn).await?;

    let mut snapshots = Vec::with_capacity(requisition.accounts.len());
    for external_id in &requisition.accounts {
        snapshots.push(AccountSnapshot::fetch(bank, external_id, window).await);
    }

    let mut tx = store.begin().await?;
    for snapshot in snapshots {
        let existing = account::by_external_id(&mut tx, &snapshot.external_id).await?;
        let linked = snapshot.apply(&conn.id, existing);

        if linked.current_balance.is_none() && linked.available_balance.is_none() {
            warn!(
                external_id = %linked.external_id,
                "no balance reported yet, will populate on next sync"
            );
        }

        account::upsert(&mut tx, &linked).await?;
    }
    tx.commit().await?;

    info!(accounts = requisition.accounts.len(), "imported account snapshots");

    Ok(())
}

async fn import_requisition(
    store: &SqliteStore,
    bank: &dyn BankData,
    conn: &mut Connection,
) -> Result<Requisition, SyncError> {
    let requisition = bank.requisition(&conn.requisition_id).await?;
    let institution = bank.institution(&conn.institution_id).await?;

    conn.raw_payload = snapshot(&requisition)?;
    conn.status = ConnectionStatus::from_requisition(&requisition.status);

    conn.raw_institution_payload = snapshot(&institution)?;
    if let Some(name) = &institution.name {
        conn.name = name.clone();
    }
    conn.institution_logo_url = institution.logo.clone();
    conn.institution_country = institution.countries.first().cloned();

    store.connections().update(conn).await?;

    Ok(requisition)
}

fn snapshot<T: Serialize>(payload: &T) -> Result<Value, SyncError> {
    Ok(serde_json::to_value(payload)?)
}

/// The first parseable balance of the listed types, in order. With `any`
/// set, any other reported balance is the last resort.
fn pick_balance(balances: &Balances, types: &[&str], any: bool) -> Option<Decimal> {
    let preferred = types.iter().filter_map(|t| balances.by_type(t));
    let rest = balances.balances.iter().filter(|_| any);

    preferred.chain(rest).find_map(parse_balance)
}

fn parse_balance(balance: &Balance) -> Option<Decimal> {
    let raw = balance.balance_amount.amount.trim();

    match Decimal::from_str(raw.strip_prefix('+').unwrap_or(raw)) {
        Ok(amount) => Some(amount),
        Err(_) => {
            warn!(amount = %raw, balance_type = %balance.balance_type, "unparseable balance amount");
            None
        }
    }
}

fn round_to_currency(amount: Decimal, currency: &str) -> Decimal {
    match rusty_money::iso::find(currency) {
        Some(iso) => amount.round_dp_with_strategy(iso.exponent, RoundingStrategy::MidpointAwayFromZero),
        None => amount,
    }
}
