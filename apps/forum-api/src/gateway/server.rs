//! WebSocket upgrade handler and the per-connection pump pair.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use crate::auth::middleware::AuthUser;
use crate::error::ChatError;
use crate::AppState;

use super::connection::Connection;
use super::events::ChatMessage;
use super::handler;
use super::hub::ConnectionHub;

/// Close code sent when the mailbox is closed by the hub.
const CLOSE_NORMAL: u16 = 1000;

/// How long the writer may take to flush its close frame after the reader
/// has gone away.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on a single socket write. A peer that cannot take a frame in
/// this time is treated as gone.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// Upgrade only for a valid, current session; otherwise the extractor
/// answers 401 and nothing is registered.
async fn ws_upgrade(
    user: AuthUser,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, user.user_id))
}

async fn handle_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let (ws_tx, ws_rx) = socket.split();

    let (conn, mailbox, outbox) = Connection::open(user_id, state.config.mailbox_capacity);
    let conn = Arc::new(conn);
    conn.register(&state.hub, mailbox);

    tracing::info!(connection_id = %conn.id, user_id, "connection registered");

    let mut writer = tokio::spawn(outbound_pump(
        conn.clone(),
        state.hub.clone(),
        ws_tx,
        outbox,
    ));

    // Whichever pump stops first ends the connection. Losing the mailbox to
    // the hub ends it too: the reader is dropped right away so an evicted
    // connection can no longer send.
    let writer_finished = tokio::select! {
        _ = inbound_pump(&conn, &state, ws_rx) => false,
        _ = &mut writer => true,
        _ = conn.detached() => {
            tracing::info!(connection_id = %conn.id, user_id, "connection detached by hub");
            false
        }
    };

    conn.shutdown(&state.hub);

    if !writer_finished && time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        tracing::debug!(connection_id = %conn.id, "writer did not finish, aborting");
        writer.abort();
    }

    tracing::info!(connection_id = %conn.id, user_id, "connection closed");
}

/// Read frames until the socket closes or errors.
async fn inbound_pump(conn: &Connection, state: &AppState, mut ws_rx: SplitStream<WebSocket>) {
    while let Some(frame) = ws_rx.next().await {
        let result = match frame {
            Ok(Message::Text(text)) => {
                conn.mark_active();
                handler::handle_frame(
                    &state.hub,
                    state.messages.as_ref(),
                    conn.user_id,
                    text.as_str().as_bytes(),
                )
                .await
            }
            Ok(Message::Binary(bytes)) => {
                conn.mark_active();
                handler::handle_frame(&state.hub, state.messages.as_ref(), conn.user_id, &bytes)
                    .await
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(?e, connection_id = %conn.id, "ws read error");
                break;
            }
        };

        match result {
            Ok(delivery) => {
                tracing::trace!(
                    connection_id = %conn.id,
                    delivered = delivery.delivered,
                    evicted = delivery.evicted,
                    "message routed"
                );
            }
            Err(err) => {
                if let ChatError::Persistence(source) = &err {
                    tracing::warn!(connection_id = %conn.id, error = %source, "failed to save message");
                } else {
                    tracing::debug!(connection_id = %conn.id, error = %err, "frame rejected");
                }
                conn.reply(ChatMessage::system(conn.user_id, err.notice()));
            }
        }
    }

    conn.shutdown(&state.hub);
}

/// Drain the mailbox onto the socket. Ends with a close frame once the hub
/// closes the mailbox, or silently on a write error or timeout.
///
/// Messages still queued when the mailbox closes are dropped: they belong
/// to a connection the hub no longer considers live.
async fn outbound_pump(
    conn: Arc<Connection>,
    hub: Arc<ConnectionHub>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<Arc<ChatMessage>>,
) {
    while let Some(message) = outbox.recv().await {
        if outbox.is_closed() {
            break;
        }

        let json = match serde_json::to_string(message.as_ref()) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(?e, connection_id = %conn.id, "failed to encode message");
                continue;
            }
        };

        match time::timeout(WRITE_TIMEOUT, ws_tx.send(Message::Text(json.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(?e, connection_id = %conn.id, "ws write error");
                conn.shutdown(&hub);
                return;
            }
            Err(_) => {
                tracing::warn!(connection_id = %conn.id, "ws write timed out");
                conn.shutdown(&hub);
                return;
            }
        }
    }

    let close = send_close(&mut ws_tx, CLOSE_NORMAL, "connection closed");
    if !matches!(time::timeout(WRITE_TIMEOUT, close).await, Ok(Ok(()))) {
        tracing::debug!(connection_id = %conn.id, "close frame not delivered");
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
