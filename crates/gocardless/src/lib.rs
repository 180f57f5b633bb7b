//! Client for the GoCardless Bank Account Data API.
//!
//! The client owns a bearer token for the lifetime of the instance: it is
//! requested lazily on first use and again whenever it has expired. Failed
//! calls are classified into [`Error`] so callers can decide on a
//! [`Recovery`].

mod error;
pub mod model;

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

pub use error::{classify, Error, Recovery};
use model::*;

pub const BASE_URL: &str = "https://bankaccountdata.gocardless.com/api/v2";
/// Upper bound on transaction history the API serves.
pub const MAX_TRANSACTION_DAYS: i64 = 90;
pub const ACCESS_VALID_FOR_DAYS: u32 = 90;
pub const ACCESS_SCOPE: [&str; 3] = ["balances", "details", "transactions"];

type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub secret_id: String,
    pub secret_key: SecretString,
}

#[derive(Debug, Default)]
pub struct Builder {
    credentials: Option<Credentials>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Bounds every HTTP call, token requests included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Client> {
        let credentials = self.credentials.ok_or(Error::MissingCredentials)?;

        let mut http = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }

        Ok(Client {
            http: http.build()?,
            base_url: self
                .base_url
                .unwrap_or_else(|| BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            credentials,
            token: Mutex::new(None),
        })
    }
}

struct AccessToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("secret_id", &self.credentials.secret_id)
            .finish()
    }
}

impl Client {
    /// Exchanges the client credentials for a fresh bearer token and caches
    /// it, replacing any token held so far.
    pub async fn authenticate(&self) -> Result<()> {
        let token = self.request_token().await?;
        *self.token.lock().await = Some(token);

        Ok(())
    }

    pub async fn institutions(&self, country: &str) -> Result<Vec<Institution>> {
        let req = self
            .request(Method::GET, "institutions/")
            .query(&[("country", country)]);

        self.send(req).await
    }

    pub async fn institution(&self, id: &str) -> Result<Institution> {
        self.send(self.request(Method::GET, &format!("institutions/{}/", id)))
            .await
    }

    pub async fn create_agreement(&self, agreement: &NewAgreement<'_>) -> Result<Agreement> {
        self.send(self.request(Method::POST, "agreements/enduser/").json(agreement))
            .await
    }

    pub async fn create_requisition(&self, requisition: &NewRequisition<'_>) -> Result<Requisition> {
        self.send(self.request(Method::POST, "requisitions/").json(requisition))
            .await
    }

    pub async fn requisition(&self, id: &str) -> Result<Requisition> {
        self.send(self.request(Method::GET, &format!("requisitions/{}/", id)))
            .await
    }

    pub async fn delete_requisition(&self, id: &str) -> Result<Value> {
        self.send(self.request(Method::DELETE, &format!("requisitions/{}/", id)))
            .await
    }

    /// Account details, unwrapped from their `account` envelope when
    /// present. The snapshot keeps the whole body.
    pub async fn account_details(&self, id: &str) -> Result<Snapshot<AccountDetails>> {
        let raw: Value = self
            .send(self.request(Method::GET, &format!("accounts/{}/details/", id)))
            .await?;

        let typed = match raw.get("account") {
            Some(account) if account.is_object() => AccountDetails::deserialize(account)?,
            _ => AccountDetails::deserialize(&raw)?,
        };

        Ok(Snapshot { raw, typed })
    }

    pub async fn account_balances(&self, id: &str) -> Result<Snapshot<Balances>> {
        let raw = self
            .send(self.request(Method::GET, &format!("accounts/{}/balances/", id)))
            .await?;

        Ok(Snapshot::from_raw(raw)?)
    }

    /// Fetches transactions for an account.
    ///
    /// `date_from` defaults to, and is clamped at, [`MAX_TRANSACTION_DAYS`]
    /// before today.
    pub async fn account_transactions(
        &self,
        id: &str,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Result<Snapshot<Transactions>> {
        let from = history_start(date_from, Utc::now().date_naive());

        let mut params = vec![("date_from", from.format("%Y-%m-%d").to_string())];
        if let Some(to) = date_to {
            params.push(("date_to", to.format("%Y-%m-%d").to_string()));
        }

        let req = self
            .request(Method::GET, &format!("accounts/{}/transactions/", id))
            .query(&params);
        let raw = self.send(req).await?;

        Ok(Snapshot::from_raw(raw)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    async fn bearer(&self) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.is_expired(Utc::now()) {
                return Ok(token.value.expose_secret().clone());
            }
        }

        let token = self.request_token().await?;
        let value = token.value.expose_secret().clone();
        *cached = Some(token);

        Ok(value)
    }

    async fn request_token(&self) -> Result<AccessToken> {
        debug!(secret_id = %self.credentials.secret_id, "requesting access token");

        let response = self
            .http
            .post(self.url("token/new/"))
            .json(&json!({
                "secret_id": self.credentials.secret_id,
                "secret_key": self.credentials.secret_key.expose_secret(),
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(Error::AuthFailure {
                details: error_body(&body),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&body)?;
        Ok(AccessToken {
            value: SecretString::new(token.access),
            expires_at: Utc::now() + ChronoDuration::seconds(token.access_expires),
        })
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let token = self.bearer().await?;
        let response = req.bearer_auth(token).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        debug!(status = %status, bytes = body.len(), "gocardless response");

        if !status.is_success() {
            return Err(classify(status.as_u16(), error_body(&body)));
        }

        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)?
        };

        Ok(serde_json::from_value(value)?)
    }
}

fn error_body(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| json!({ "detail": String::from_utf8_lossy(body) }))
}

fn history_start(requested: Option<NaiveDate>, today: NaiveDate) -> NaiveDate {
    let earliest = today - ChronoDuration::days(MAX_TRANSACTION_DAYS);

    match requested {
        Some(date) if date > earliest => date,
        _ => earliest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn history_defaults_to_ninety_days() {
        assert_eq!(history_start(None, date("2024-04-01")), date("2024-01-02"));
    }

    #[test]
    fn history_is_clamped() {
        let today = date("2024-04-01");

        assert_eq!(history_start(Some(date("2023-01-01")), today), date("2024-01-02"));
        assert_eq!(history_start(Some(date("2024-03-01")), today), date("2024-03-01"));
    }

    #[test]
    fn builder_requires_credentials() {
        assert!(matches!(Builder::new().build(), Err(Error::MissingCredentials)));
    }

    #[test]
    fn token_expiry_is_inclusive() {
        let now = Utc::now();
        let token = AccessToken {
            value: SecretString::new("t".into()),
            expires_at: now,
        };

        assert!(token.is_expired(now));
        assert!(!token.is_expired(now - ChronoDuration::seconds(1)));
    }
}
