//! Live balance push over WebSocket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{BoxStream, StreamExt};

use credit_ledger_core::LedgerError;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::credits::BalanceResponse;
use crate::ledger::BalanceView;
use crate::state::AppState;

/// Upgrade to a WebSocket that receives one JSON balance per change.
///
/// The subscription is opened before the upgrade so anonymous callers get a
/// plain 401. The socket closes when the account is erased.
pub async fn live_balance(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Response, ApiError> {
    let updates = state.ledger.subscribe(&auth.principal)?;
    let account_id = auth.principal.account_id.to_string();

    tracing::debug!(account_id = %account_id, "Live balance subscription opened");

    Ok(ws.on_upgrade(move |socket| push_balances(socket, account_id, updates)))
}

fn render(
    account_id: &str,
    update: Result<BalanceView, LedgerError>,
) -> serde_json::Result<String> {
    match update {
        Ok(view) => serde_json::to_string(&BalanceResponse::new(account_id, &view)),
        Err(err) => {
            tracing::warn!(account_id = %account_id, error = %err, "Live balance update failed");
            serde_json::to_string(&serde_json::json!({
                "error": { "code": err.code(), "message": err.to_string() }
            }))
        }
    }
}

async fn push_balances(
    mut socket: WebSocket,
    account_id: String,
    mut updates: BoxStream<'static, Result<BalanceView, LedgerError>>,
) {
    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(update) = update else { break };
                let Ok(payload) = render(&account_id, update) else { break };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                // Client messages are ignored; only a close ends the push.
                match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!(account_id = %account_id, "Live balance subscription closed");
}
