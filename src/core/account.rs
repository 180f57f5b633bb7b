use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

/// Local mirror of one account exposed by a connection.
#[derive(Debug, Clone)]
pub struct LinkedAccount {
    pub id: String,
    pub connection_id: String,
    pub external_id: String,
    pub iban: Option<String>,
    pub name: String,
    pub owner_name: Option<String>,
    pub currency: String,
    pub account_type: Option<String>,
    pub current_balance: Option<Decimal>,
    pub available_balance: Option<Decimal>,
    pub raw_payload: serde_json::Value,
    pub raw_balances_payload: serde_json::Value,
    pub raw_transactions_payload: serde_json::Value,
}

impl LinkedAccount {
    /// The figure the ledger treats as the account balance.
    pub fn resolved_balance(&self) -> Decimal {
        self.current_balance
            .or(self.available_balance)
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accountable {
    Depository,
    CreditCard,
    Loan,
    OtherAsset,
}

impl Accountable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accountable::Depository => "depository",
            Accountable::CreditCard => "credit_card",
            Accountable::Loan => "loan",
            Accountable::OtherAsset => "other_asset",
        }
    }
}

impl fmt::Display for Accountable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Accountable {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "depository" => Ok(Accountable::Depository),
            "credit_card" => Ok(Accountable::CreditCard),
            "loan" => Ok(Accountable::Loan),
            "other_asset" => Ok(Accountable::OtherAsset),
            s => Err(anyhow::anyhow!("unknown accountable type {}", s)),
        }
    }
}

/// Ledger-side account a linked account feeds.
#[derive(Debug, Clone)]
pub struct LedgerAccount {
    pub id: String,
    pub tenant_id: String,
    pub linked_account_id: Option<String>,
    pub name: String,
    pub accountable: Accountable,
    pub subtype: Option<String>,
    pub currency: String,
    pub balance: Decimal,
    pub cash_balance: Decimal,
}
