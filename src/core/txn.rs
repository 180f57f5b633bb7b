use chrono::NaiveDate;
use rust_decimal::Decimal;

/// One ledger entry per real-world transaction.
///
/// `amount` follows the ledger convention: positive is money leaving the
/// account.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: String,
    pub account_id: String,
    pub dedup_key: String,
    pub name: String,
    pub amount: Decimal,
    pub currency: String,
    pub date: NaiveDate,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
}
