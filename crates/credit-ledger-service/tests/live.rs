//! Live balance WebSocket tests.

mod common;

use axum_test::WsMessage;
use common::TestHarness;

const LIVE_PATH: &str = "/v1/credits/balance/live";

#[tokio::test]
async fn pushes_current_balance_then_changes() {
    let harness = TestHarness::with_http_transport();

    let mut socket = harness
        .server
        .get_websocket(LIVE_PATH)
        .add_header("authorization", harness.user_auth_header())
        .await
        .into_websocket()
        .await;

    let first: serde_json::Value = socket.receive_json().await;
    assert_eq!(first["account_id"], "user-1");
    assert_eq!(first["balance"], 5);
    assert_eq!(first["revision"], 0);

    harness.spend().await;

    let next: serde_json::Value = socket.receive_json().await;
    assert_eq!(next["balance"], 4);
    assert_eq!(next["revision"], 1);
}

#[tokio::test]
async fn erasing_the_account_closes_the_socket() {
    let harness = TestHarness::with_http_transport();
    harness.spend().await;

    let mut socket = harness
        .server
        .get_websocket(LIVE_PATH)
        .add_header("authorization", harness.user_auth_header())
        .await
        .into_websocket()
        .await;

    let first: serde_json::Value = socket.receive_json().await;
    assert_eq!(first["balance"], 4);

    harness
        .server
        .delete("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_ok();

    loop {
        match socket.receive_message().await {
            WsMessage::Close(_) => break,
            WsMessage::Text(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn anonymous_callers_are_refused_before_upgrade() {
    let harness = TestHarness::with_http_transport();

    let response = harness
        .server
        .get_websocket(LIVE_PATH)
        .add_header("authorization", harness.anonymous_auth_header())
        .await;

    response.assert_status_unauthorized();
}
