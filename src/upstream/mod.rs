//! Seam between the sync engine and the aggregator.
//!
//! The engine only talks to [`BankData`]; production wires in
//! [`gocardless::Client`], tests a scripted fake.

#[cfg(test)]
pub(crate) mod fake;
mod gocardless;

use async_trait::async_trait;
use chrono::NaiveDate;

use ::gocardless::model::{
    AccountDetails, Agreement, Balances, Institution, NewAgreement, NewRequisition, Requisition,
    Snapshot, Transactions,
};
use ::gocardless::Error;

pub type RemoteResult<T> = ::std::result::Result<T, Error>;

#[async_trait]
pub trait BankData: Send + Sync {
    async fn institutions(&self, country: &str) -> RemoteResult<Vec<Institution>>;

    async fn institution(&self, id: &str) -> RemoteResult<Institution>;

    async fn create_agreement(&self, agreement: &NewAgreement<'_>) -> RemoteResult<Agreement>;

    async fn create_requisition(
        &self,
        requisition: &NewRequisition<'_>,
    ) -> RemoteResult<Requisition>;

    async fn requisition(&self, id: &str) -> RemoteResult<Requisition>;

    async fn delete_requisition(&self, id: &str) -> RemoteResult<()>;

    async fn account_details(&self, id: &str) -> RemoteResult<Snapshot<AccountDetails>>;

    async fn account_balances(&self, id: &str) -> RemoteResult<Snapshot<Balances>>;

    async fn account_transactions(
        &self,
        id: &str,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> RemoteResult<Snapshot<Transactions>>;
}
