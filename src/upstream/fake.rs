use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};

use ::gocardless::model::{
    AccountDetails, Agreement, Amount, Balance, Balances, Institution, NewAgreement,
    NewRequisition, Requisition, Snapshot, Transaction, TransactionSets, Transactions,
};
use ::gocardless::classify;

use super::{BankData, RemoteResult};

/// In-memory aggregator. Responses and failures are scripted per call key,
/// e.g. `requisition:req_1` or `balances:acc_1`.
#[derive(Default)]
pub(crate) struct FakeBank {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    institutions: HashMap<String, Institution>,
    requisitions: HashMap<String, Requisition>,
    details: HashMap<String, Value>,
    balances: HashMap<String, Value>,
    transactions: HashMap<String, Value>,
    failures: HashMap<String, (u16, Value)>,
    calls: Vec<String>,
    next_id: usize,
}

impl FakeBank {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_institution(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().institutions.insert(
            id.to_string(),
            Institution {
                id: id.to_string(),
                name: Some(name.to_string()),
                logo: Some(format!("https://cdn.example.com/{}.png", id)),
                countries: vec!["GB".into()],
                ..Default::default()
            },
        );
        self
    }

    pub(crate) fn with_requisition(self, id: &str, status: &str, accounts: &[&str]) -> Self {
        self.set_requisition(id, status, accounts);
        self
    }

    pub(crate) fn set_requisition(&self, id: &str, status: &str, accounts: &[&str]) {
        self.state.lock().unwrap().requisitions.insert(
            id.to_string(),
            Requisition {
                id: id.to_string(),
                status: status.to_string(),
                accounts: accounts.iter().map(|a| a.to_string()).collect(),
                institution_id: Some("BANK_ID".into()),
                ..Default::default()
            },
        );
    }

    pub(crate) fn with_account(
        self,
        id: &str,
        details: AccountDetails,
        balances: Balances,
        booked: Vec<Transaction>,
    ) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.details.insert(id.to_string(), to_raw(details));
            state.balances.insert(id.to_string(), to_raw(balances));
            state.transactions.insert(
                id.to_string(),
                to_raw(Transactions {
                    transactions: TransactionSets {
                        booked,
                        ..Default::default()
                    },
                    ..Default::default()
                }),
            );
        }
        self
    }

    pub(crate) fn with_pending(self, id: &str, pending: Vec<Transaction>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let raw = state
                .transactions
                .entry(id.to_string())
                .or_insert_with(|| json!({}));
            raw["transactions"]["pending"] = to_raw(pending);
        }
        self
    }

    /// Serves `raw` verbatim as the account's transactions body.
    pub(crate) fn with_raw_transactions(self, id: &str, raw: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(id.to_string(), raw);
        self
    }

    /// Makes every call to `key` fail with the given status and body.
    pub(crate) fn fail(&self, key: &str, status: u16, body: Value) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(key.to_string(), (status, body));
    }

    pub(crate) fn heal(&self, key: &str) {
        self.state.lock().unwrap().failures.remove(key);
    }

    pub(crate) fn calls(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == key)
            .count()
    }

    fn record(&self, key: String) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(key.clone());
        match state.failures.get(&key) {
            Some((status, body)) => Err(classify(*status, body.clone())),
            None => Ok(()),
        }
    }

    fn missing() -> ::gocardless::Error {
        classify(404, json!({"detail": "Not found."}))
    }
}

#[async_trait]
impl BankData for FakeBank {
    async fn institutions(&self, country: &str) -> RemoteResult<Vec<Institution>> {
        self.record(format!("institutions:{}", country))?;
        let state = self.state.lock().unwrap();
        let mut found: Vec<Institution> = state
            .institutions
            .values()
            .filter(|i| i.countries.iter().any(|c| c == country))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn institution(&self, id: &str) -> RemoteResult<Institution> {
        self.record(format!("institution:{}", id))?;
        self.state
            .lock()
            .unwrap()
            .institutions
            .get(id)
            .cloned()
            .ok_or_else(Self::missing)
    }

    async fn create_agreement(&self, agreement: &NewAgreement<'_>) -> RemoteResult<Agreement> {
        self.record("create_agreement".into())?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        Ok(Agreement {
            id: format!("agr_{}", state.next_id),
            institution_id: Some(agreement.institution_id.to_string()),
            max_historical_days: Some(agreement.max_historical_days),
            access_valid_for_days: Some(agreement.access_valid_for_days),
            access_scope: agreement.access_scope.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    async fn create_requisition(
        &self,
        requisition: &NewRequisition<'_>,
    ) -> RemoteResult<Requisition> {
        self.record("create_requisition".into())?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("req_new_{}", state.next_id);
        let created = Requisition {
            id: id.clone(),
            status: "CR".into(),
            link: Some(format!("https://ob.example.com/psd2/start/{}", id)),
            institution_id: Some(requisition.institution_id.to_string()),
            reference: Some(requisition.reference.to_string()),
            agreement: requisition.agreement_id.map(|a| a.to_string()),
            ..Default::default()
        };
        state.requisitions.insert(id, created.clone());
        Ok(created)
    }

    async fn requisition(&self, id: &str) -> RemoteResult<Requisition> {
        self.record(format!("requisition:{}", id))?;
        self.state
            .lock()
            .unwrap()
            .requisitions
            .get(id)
            .cloned()
            .ok_or_else(Self::missing)
    }

    async fn delete_requisition(&self, id: &str) -> RemoteResult<()> {
        self.record(format!("delete_requisition:{}", id))?;
        self.state
            .lock()
            .unwrap()
            .requisitions
            .remove(id)
            .map(|_| ())
            .ok_or_else(Self::missing)
    }

    async fn account_details(&self, id: &str) -> RemoteResult<Snapshot<AccountDetails>> {
        self.record(format!("details:{}", id))?;
        let raw = self
            .state
            .lock()
            .unwrap()
            .details
            .get(id)
            .cloned()
            .ok_or_else(Self::missing)?;

        Ok(Snapshot::from_raw(raw)?)
    }

    async fn account_balances(&self, id: &str) -> RemoteResult<Snapshot<Balances>> {
        self.record(format!("balances:{}", id))?;
        let raw = self
            .state
            .lock()
            .unwrap()
            .balances
            .get(id)
            .cloned()
            .ok_or_else(Self::missing)?;

        Ok(Snapshot::from_raw(raw)?)
    }

    async fn account_transactions(
        &self,
        id: &str,
        _date_from: Option<NaiveDate>,
        _date_to: Option<NaiveDate>,
    ) -> RemoteResult<Snapshot<Transactions>> {
        self.record(format!("transactions:{}", id))?;
        let raw = self
            .state
            .lock()
            .unwrap()
            .transactions
            .get(id)
            .cloned()
            .ok_or_else(Self::missing)?;

        Ok(Snapshot::from_raw(raw)?)
    }
}

fn to_raw<T: Serialize>(payload: T) -> Value {
    serde_json::to_value(payload).unwrap()
}

/// A payload as if it came off the wire.
pub(crate) fn received<T: Serialize>(typed: T) -> Snapshot<T> {
    Snapshot {
        raw: to_raw(&typed),
        typed,
    }
}

pub(crate) fn details(name: &str, currency: &str, cash_account_type: &str) -> AccountDetails {
    AccountDetails {
        name: Some(name.to_string()),
        currency: Some(currency.to_string()),
        cash_account_type: Some(cash_account_type.to_string()),
        ..Default::default()
    }
}

pub(crate) fn balances(entries: &[(&str, &str, &str)]) -> Balances {
    Balances {
        balances: entries
            .iter()
            .map(|(balance_type, amount, currency)| Balance {
                balance_amount: Amount {
                    amount: amount.to_string(),
                    currency: Some(currency.to_string()),
                },
                balance_type: balance_type.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// A booked transaction without an external id.
pub(crate) fn booked(date: &str, amount: &str, text: &str) -> Transaction {
    Transaction {
        booking_date: Some(date.to_string()),
        transaction_amount: Some(Amount {
            amount: amount.to_string(),
            currency: None,
        }),
        remittance_information_unstructured: Some(text.to_string()),
        ..Default::default()
    }
}
