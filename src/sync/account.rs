use chrono::NaiveDate;
use tracing::debug;

use super::SyncError;
use crate::core::{Accountable, Attribute, EnrichmentSource, LedgerAccount, LinkedAccount};
use crate::store::{ledger, SqliteStore};

/// Maps an ISO 20022 cash account type onto the ledger's account kind and
/// subtype. Unknown or missing codes are treated as checking accounts.
pub fn account_kind(cash_account_type: Option<&str>) -> (Accountable, &'static str) {
    match cash_account_type.map(|c| c.trim().to_ascii_uppercase()).as_deref() {
        Some("CACC") | Some("TRAN") | Some("CASH") => (Accountable::Depository, "checking"),
        Some("SVGS") => (Accountable::Depository, "savings"),
        Some("CARD") => (Accountable::CreditCard, "credit_card"),
        Some("LOAN") => (Accountable::Loan, "other"),
        Some("MORT") => (Accountable::Loan, "mortgage"),
        Some("OTHR") => (Accountable::OtherAsset, "other"),
        _ => (Accountable::Depository, "checking"),
    }
}

/// Brings the ledger account fed by `linked` in line with it, creating the
/// ledger account on first sight.
#[tracing::instrument(skip_all, fields(linked_account_id = %linked.id))]
pub async fn reconcile(
    store: &SqliteStore,
    tenant_id: &str,
    linked: &LinkedAccount,
    today: NaiveDate,
) -> Result<LedgerAccount, SyncError> {
    let (accountable, subtype) = account_kind(linked.account_type.as_deref());
    let balance = linked.resolved_balance();

    let mut tx = store.begin().await?;

    let account = ledger::find_or_create_account(
        &mut tx,
        &LedgerAccount {
            id: ulid::Ulid::new().to_string(),
            tenant_id: tenant_id.to_string(),
            linked_account_id: Some(linked.id.clone()),
            name: linked.name.clone(),
            accountable,
            subtype: Some(subtype.to_string()),
            currency: linked.currency.clone(),
            balance,
            cash_balance: balance,
        },
    )
    .await?;

    for (attribute, value) in [
        (Attribute::AccountName, linked.name.as_str()),
        (Attribute::AccountSubtype, subtype),
    ] {
        let written = ledger::enrich(
            &mut tx,
            attribute,
            &account.id,
            Some(value),
            EnrichmentSource::BankSync,
        )
        .await?;
        if !written {
            debug!(account_id = %account.id, ?attribute, "keeping user-claimed value");
        }
    }

    ledger::update_account_balance(&mut tx, &account.id, accountable, &linked.currency, balance)
        .await?;
    ledger::upsert_anchor(&mut tx, &account.id, today, balance).await?;

    let account = ledger::account_by_id(&mut tx, &account.id).await?;
    tx.commit().await?;

    Ok(account)
}
