mod account;
mod connection;
mod txn;

use std::fmt;
use std::str::FromStr;

pub use account::{Accountable, LedgerAccount, LinkedAccount};
pub use connection::{Connection, ConnectionStatus, ACCESS_WINDOW_DAYS, EXPIRY_WARNING_DAYS};
pub use txn::{Category, LedgerEntry};

/// Where a value written to an enrichable attribute came from.
///
/// Ordered by priority: a source never overwrites an attribute claimed by a
/// higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnrichmentSource {
    BankSync,
    User,
}

impl EnrichmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentSource::BankSync => "gocardless",
            EnrichmentSource::User => "user",
        }
    }
}

impl fmt::Display for EnrichmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrichmentSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gocardless" => Ok(EnrichmentSource::BankSync),
            "user" => Ok(EnrichmentSource::User),
            s => Err(anyhow::anyhow!("unknown enrichment source {}", s)),
        }
    }
}

/// Ledger fields a sync may only write through the enrichment rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    AccountName,
    AccountSubtype,
    EntryName,
    EntryCategory,
}

impl Attribute {
    /// `(entity, column)` the attribute lives in.
    pub fn target(&self) -> (&'static str, &'static str) {
        match self {
            Attribute::AccountName => ("ledger_accounts", "name"),
            Attribute::AccountSubtype => ("ledger_accounts", "subtype"),
            Attribute::EntryName => ("ledger_entries", "name"),
            Attribute::EntryCategory => ("ledger_entries", "category_id"),
        }
    }
}
