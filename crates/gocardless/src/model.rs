//! Payloads exchanged with the Bank Account Data API.
//!
//! Every response type keeps the fields it does not model in `extra`, so a
//! payload can be written back out as a faithful snapshot of what the API
//! returned.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A response body exactly as received, next to its typed view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot<T> {
    pub raw: Value,
    pub typed: T,
}

impl<T: DeserializeOwned> Snapshot<T> {
    pub fn from_raw(raw: Value) -> Result<Self, serde_json::Error> {
        let typed = T::deserialize(&raw)?;
        Ok(Self { raw, typed })
    }
}

/// Banks send `null` where a list or string is simply empty.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub countries: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAgreement<'a> {
    pub institution_id: &'a str,
    pub max_historical_days: u32,
    pub access_valid_for_days: u32,
    pub access_scope: &'a [&'a str],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_historical_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_valid_for_days: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub access_scope: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRequisition<'a> {
    pub institution_id: &'a str,
    #[serde(rename = "redirect")]
    pub redirect_url: &'a str,
    pub reference: &'a str,
    pub user_language: &'a str,
    #[serde(rename = "agreement", skip_serializing_if = "Option::is_none")]
    pub agreement_id: Option<&'a str>,
}

/// A single consent request and the accounts it authorised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: String,
    /// Short status code, e.g. `CR`, `LN`, `EX`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    /// Consent URL the user has to visit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub accounts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iban: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// ISO 20022 ExternalCashAccountType1Code, e.g. `CACC`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_account_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    /// Signed decimal string as sent by the bank, e.g. `-50.00`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    #[serde(default, deserialize_with = "null_as_default")]
    pub balance_amount: Amount,
    #[serde(default, deserialize_with = "null_as_default")]
    pub balance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    #[serde(default, deserialize_with = "null_as_default")]
    pub balances: Vec<Balance>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Balances {
    pub fn by_type(&self, balance_type: &str) -> Option<&Balance> {
        self.balances
            .iter()
            .find(|b| b.balance_type == balance_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remittance_information_unstructured: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub remittance_information_unstructured_array: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creditor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debtor_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionSets {
    #[serde(default, deserialize_with = "null_as_default")]
    pub booked: Vec<Transaction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pending: Vec<Transaction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transactions {
    #[serde(default, deserialize_with = "null_as_default")]
    pub transactions: TransactionSets,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access: String,
    pub(crate) access_expires: i64,
}
