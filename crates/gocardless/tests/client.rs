use gocardless::model::{NewAgreement, NewRequisition};
use gocardless::{Builder, Client, Credentials, Error, Recovery, ACCESS_SCOPE};
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> Client {
    Builder::new()
        .with_credentials(Credentials {
            secret_id: "test_secret_id".into(),
            secret_key: SecretString::new("test_secret_key".into()),
        })
        .with_base_url(server.uri())
        .build()
        .unwrap()
}

async fn mount_token(server: &MockServer, ttl: i64, times: u64) {
    Mock::given(method("POST"))
        .and(path("/token/new/"))
        .and(body_json(json!({
            "secret_id": "test_secret_id",
            "secret_key": "test_secret_key"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": "token",
            "access_expires": ttl,
            "refresh": "refresh",
            "refresh_expires": 604800
        })))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn token_is_cached_between_calls() {
    let server = MockServer::start().await;
    mount_token(&server, 86400, 1).await;

    Mock::given(method("GET"))
        .and(path("/institutions/SANDBOXFINANCE_SFIN0000/"))
        .and(header("authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "SANDBOXFINANCE_SFIN0000",
            "name": "Sandbox Finance",
            "countries": ["GB"]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    client.institution("SANDBOXFINANCE_SFIN0000").await.unwrap();
    let ins = client.institution("SANDBOXFINANCE_SFIN0000").await.unwrap();

    assert_eq!(ins.name.as_deref(), Some("Sandbox Finance"));
    assert_eq!(ins.countries, vec!["GB".to_string()]);
}

#[tokio::test]
async fn expired_token_is_refreshed() {
    let server = MockServer::start().await;
    mount_token(&server, 0, 2).await;

    Mock::given(method("GET"))
        .and(path("/requisitions/req_123/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "req_123",
            "status": "LN",
            "accounts": ["acc_1", "acc_2"]
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    client.requisition("req_123").await.unwrap();
    let requisition = client.requisition("req_123").await.unwrap();

    assert_eq!(requisition.status, "LN");
    assert_eq!(requisition.accounts.len(), 2);
}

#[tokio::test]
async fn failed_authentication_is_an_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token/new/"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Authentication failed"})),
        )
        .mount(&server)
        .await;

    let err = client(&server).authenticate().await.unwrap_err();

    assert!(matches!(err, Error::AuthFailure { .. }));
    assert!(err.to_string().contains("Authentication failed"));
}

#[tokio::test]
async fn lists_institutions_by_country() {
    let server = MockServer::start().await;
    mount_token(&server, 86400, 1).await;

    Mock::given(method("GET"))
        .and(path("/institutions/"))
        .and(query_param("country", "GB"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "SANDBOXFINANCE_SFIN0000",
            "name": "Sandbox Finance",
            "countries": ["GB"],
            "logo": "https://example.com/logo.png"
        }])))
        .mount(&server)
        .await;

    let institutions = client(&server).institutions("GB").await.unwrap();

    assert_eq!(institutions.len(), 1);
    assert_eq!(institutions[0].id, "SANDBOXFINANCE_SFIN0000");
}

#[tokio::test]
async fn creates_agreement_and_requisition() {
    let server = MockServer::start().await;
    mount_token(&server, 86400, 1).await;

    Mock::given(method("POST"))
        .and(path("/agreements/enduser/"))
        .and(body_json(json!({
            "institution_id": "BANK_ID",
            "max_historical_days": 90,
            "access_valid_for_days": 90,
            "access_scope": ["balances", "details", "transactions"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "agreement_123",
            "institution_id": "BANK_ID",
            "max_historical_days": 90
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/requisitions/"))
        .and(body_json(json!({
            "institution_id": "BANK_ID",
            "redirect": "https://example.com/callback",
            "reference": "ref_123",
            "user_language": "EN",
            "agreement": "agreement_123"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "req_123",
            "link": "https://ob.gocardless.com/psd2/start/req_123",
            "status": "CR"
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let agreement = client
        .create_agreement(&NewAgreement {
            institution_id: "BANK_ID",
            max_historical_days: 90,
            access_valid_for_days: 90,
            access_scope: &ACCESS_SCOPE,
        })
        .await
        .unwrap();
    let requisition = client
        .create_requisition(&NewRequisition {
            institution_id: "BANK_ID",
            redirect_url: "https://example.com/callback",
            reference: "ref_123",
            user_language: "EN",
            agreement_id: Some(&agreement.id),
        })
        .await
        .unwrap();

    assert_eq!(requisition.id, "req_123");
    assert!(requisition.link.unwrap().contains("gocardless.com"));
}

#[tokio::test]
async fn unwraps_account_details_envelope() {
    let server = MockServer::start().await;
    mount_token(&server, 86400, 1).await;

    Mock::given(method("GET"))
        .and(path("/accounts/acc_123/details/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account": {
                "iban": "GB33BUKB20201555555555",
                "name": "Main Account",
                "currency": "GBP",
                "cashAccountType": "CACC"
            }
        })))
        .mount(&server)
        .await;

    let snapshot = client(&server).account_details("acc_123").await.unwrap();
    let details = &snapshot.typed;

    assert_eq!(snapshot.raw["account"]["name"], json!("Main Account"));
    assert_eq!(details.iban.as_deref(), Some("GB33BUKB20201555555555"));
    assert_eq!(details.currency.as_deref(), Some("GBP"));
    assert_eq!(details.cash_account_type.as_deref(), Some("CACC"));
}

#[tokio::test]
async fn fetches_balances_and_transactions() {
    let server = MockServer::start().await;
    mount_token(&server, 86400, 1).await;

    Mock::given(method("GET"))
        .and(path("/accounts/acc_123/balances/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "balances": [
                {"balanceAmount": {"amount": "1500.50", "currency": "GBP"}, "balanceType": "expected"}
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/accounts/acc_123/transactions/"))
        .and(query_param("date_to", "2099-01-31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": {
                "booked": [
                    {"transactionId": "txn_1", "bookingDate": "2024-01-15", "transactionAmount": {"amount": "-50.00", "currency": "GBP"}},
                    {"transactionId": null, "bookingDate": "2024-01-16", "transactionAmount": {"currency": "GBP"}, "remittanceInformationUnstructuredArray": []}
                ],
                "pending": []
            }
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let balances = client.account_balances("acc_123").await.unwrap();
    let to = chrono::NaiveDate::from_ymd_opt(2099, 1, 31).unwrap();
    let txns = client
        .account_transactions("acc_123", None, Some(to))
        .await
        .unwrap();

    assert_eq!(
        balances.typed.by_type("expected").unwrap().balance_amount.amount,
        "1500.50"
    );
    assert_eq!(txns.typed.transactions.booked.len(), 2);
    assert_eq!(
        txns.typed.transactions.booked[0].transaction_id.as_deref(),
        Some("txn_1")
    );

    // stored as received, nulls and empty arrays included
    let odd = &txns.raw["transactions"]["booked"][1];
    assert_eq!(odd["transactionId"], json!(null));
    assert_eq!(odd["remittanceInformationUnstructuredArray"], json!([]));
}

#[tokio::test]
async fn delete_of_missing_requisition_is_not_found() {
    let server = MockServer::start().await;
    mount_token(&server, 86400, 1).await;

    Mock::given(method("DELETE"))
        .and(path("/requisitions/req_gone/"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "summary": "Not found.",
            "detail": "Not found.",
            "status_code": 404
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .delete_requisition("req_gone")
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.recovery(), Recovery::AlreadyGone);
}

#[tokio::test]
async fn classifies_expired_access() {
    let server = MockServer::start().await;
    mount_token(&server, 86400, 1).await;

    Mock::given(method("GET"))
        .and(path("/requisitions/req_old/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "summary": "End User Agreement (EUA) has expired",
            "type": "EUA_EXPIRED",
            "status_code": 400
        })))
        .mount(&server)
        .await;

    let err = client(&server).requisition("req_old").await.unwrap_err();

    assert!(matches!(err, Error::AccessExpired { .. }));
    assert_eq!(err.recovery(), Recovery::ExpireConnection);
}

#[tokio::test]
async fn generic_failures_carry_status_and_detail() {
    let server = MockServer::start().await;
    mount_token(&server, 86400, 1).await;

    Mock::given(method("GET"))
        .and(path("/institutions/"))
        .and(query_param("country", "XX"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"detail": "Invalid country code"})),
        )
        .mount(&server)
        .await;

    let err = client(&server).institutions("XX").await.unwrap_err();

    match &err {
        Error::Api { status, code, .. } => {
            assert_eq!(*status, 400);
            assert_eq!(code, "400");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().contains("Invalid country code"));
}
