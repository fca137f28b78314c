//! Client tests against a mocked ledger service.

use credit_ledger_client::{ClientError, LedgerAction, LedgerClient};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn entry(sequence: u64, action: &str, delta: i64, balance_after: i64) -> serde_json::Value {
    json!({
        "id": format!("01HZX{sequence:021}"),
        "sequence": sequence,
        "action": action,
        "delta": delta,
        "balance_after": balance_after,
        "created_at": "2026-01-01T00:00:00+00:00"
    })
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    json!({ "error": { "code": code, "message": message } })
}

#[tokio::test]
async fn get_balance_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/credits/balance"))
        .and(header("authorization", "Bearer id-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account_id": "user-1",
            "balance": 5,
            "revision": 0,
            "granted": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let balance = client.get_balance("id-token").await.unwrap();

    assert_eq!(balance.account_id, "user-1");
    assert_eq!(balance.balance, 5);
    assert!(!balance.granted);
}

#[tokio::test]
async fn spend_decodes_entry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/credits/spend"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "balance": 4,
            "entry": entry(1, "initial_grant", -4, 4)
        })))
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let receipt = client.spend("id-token").await.unwrap();

    assert_eq!(receipt.balance, 4);
    assert_eq!(receipt.entry.action, LedgerAction::InitialGrant);
    assert_eq!(receipt.entry.sequence, 1);
    assert!(receipt.entry.reference.is_none());
}

#[tokio::test]
async fn spend_maps_insufficient_credits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/credits/spend"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "code": "insufficient_credits",
                "message": "Insufficient credits: balance 0, required 1",
                "details": { "balance": 0, "required": 1 }
            }
        })))
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let result = client.spend("id-token").await;

    assert!(matches!(
        result,
        Err(ClientError::InsufficientCredits {
            balance: 0,
            required: 1
        })
    ));
}

#[tokio::test]
async fn unauthenticated_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/credits/balance"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(error_body("unauthenticated", "Authentication required")),
        )
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let result = client.get_balance("anonymous").await;

    assert!(matches!(result, Err(ClientError::Unauthenticated(_))));
}

#[tokio::test]
async fn unavailable_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/credits/spend"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(error_body(
                "ledger_unavailable",
                "Ledger unavailable after 5 attempts",
            )),
        )
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let err = client.spend("id-token").await.unwrap_err();

    assert!(matches!(err, ClientError::LedgerUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn list_entries_passes_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/credits/entries"))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [entry(2, "spend", 1, 3), entry(1, "initial_grant", -4, 4)],
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let page = client.list_entries("id-token", 2, 4).await.unwrap();

    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.entries[0].sequence, 2);
    assert_eq!(page.entries[0].action, LedgerAction::Spend);
    assert!(!page.has_more);
}

#[tokio::test]
async fn grant_credits_sends_admin_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/admin/credits/grant"))
        .and(header("x-admin-key", "admin-secret"))
        .and(body_json(json!({ "account_id": "user-1", "amount": 10 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account_id": "user-1",
            "balance": 14,
            "entry": entry(2, "admin_grant", -10, 14),
            "duplicate": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let credit = client
        .grant_credits("admin-secret", "user-1", 10)
        .await
        .unwrap();

    assert_eq!(credit.balance, 14);
    assert_eq!(credit.entry.delta, -10);
    assert!(!credit.duplicate);
}

#[tokio::test]
async fn grant_to_unknown_account_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/admin/credits/grant"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(error_body("account_not_found", "Account not found: ghost")),
        )
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let result = client.grant_credits("admin-secret", "ghost", 10).await;

    assert!(matches!(result, Err(ClientError::AccountNotFound(_))));
}

#[tokio::test]
async fn reconcile_decodes_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/admin/accounts/user-1/reconcile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account_id": "user-1",
            "recorded_balance": 3,
            "replayed_balance": 3,
            "entry_count": 2,
            "sequence_intact": true
        })))
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let report = client.reconcile("admin-secret", "user-1").await.unwrap();

    assert!(report.is_consistent());
    assert_eq!(report.entry_count, 2);
}

#[tokio::test]
async fn unknown_error_codes_fall_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/admin/credits/grant"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(error_body("invalid_amount", "amount 0")),
        )
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let result = client.grant_credits("admin-secret", "user-1", 0).await;

    match result {
        Err(ClientError::Api { code, status, .. }) => {
            assert_eq!(code, "invalid_amount");
            assert_eq!(status, 400);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn non_json_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/credits/balance"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = LedgerClient::new(server.uri()).unwrap();
    let result = client.get_balance("id-token").await;

    assert!(matches!(
        result,
        Err(ClientError::Api { status: 502, .. })
    ));
}
