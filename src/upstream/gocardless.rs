use async_trait::async_trait;
use chrono::NaiveDate;
use ::gocardless::model::{
    AccountDetails, Agreement, Balances, Institution, NewAgreement, NewRequisition, Requisition,
    Snapshot, Transactions,
};
use ::gocardless::Client;

use super::{BankData, RemoteResult};

#[async_trait]
impl BankData for Client {
    async fn institutions(&self, country: &str) -> RemoteResult<Vec<Institution>> {
        Client::institutions(self, country).await
    }

    async fn institution(&self, id: &str) -> RemoteResult<Institution> {
        Client::institution(self, id).await
    }

    async fn create_agreement(&self, agreement: &NewAgreement<'_>) -> RemoteResult<Agreement> {
        Client::create_agreement(self, agreement).await
    }

    async fn create_requisition(
        &self,
        requisition: &NewRequisition<'_>,
    ) -> RemoteResult<Requisition> {
        Client::create_requisition(self, requisition).await
    }

    async fn requisition(&self, id: &str) -> RemoteResult<Requisition> {
        Client::requisition(self, id).await
    }

    async fn delete_requisition(&self, id: &str) -> RemoteResult<()> {
        Client::delete_requisition(self, id).await.map(|_| ())
    }

    async fn account_details(&self, id: &str) -> RemoteResult<Snapshot<AccountDetails>> {
        Client::account_details(self, id).await
    }

    async fn account_balances(&self, id: &str) -> RemoteResult<Snapshot<Balances>> {
        Client::account_balances(self, id).await
    }

    async fn account_transactions(
        &self,
        id: &str,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> RemoteResult<Snapshot<Transactions>> {
        Client::account_transactions(self, id, date_from, date_to).await
    }
}
