//! Duplex Handler (E, §4.5): upgrades the HTTP request, then runs the
//! open/processing/closed state machine for the lifetime of the connection.

use crate::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use gateway_backend::{process_client_message, ServerFrame, TurnContext};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One independent task per connection (§5); cancellation is rooted here and
/// propagates to whatever turn is currently in flight.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(state.ws_buffer_size);
    let cancel = CancellationToken::new();

    let writer = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        if sink.send(WsMessage::Text(frame.to_json())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    let turn_ctx = TurnContext {
        store: state.store.clone(),
        adapter: state.adapter.clone(),
        processor_config: state.processor_config,
    };

    // The turn currently in flight, if any. Kept alongside the read loop (rather
    // than awaited inline) so a client disconnect or receive error observed while
    // a turn is running can still trip `cancel` promptly — an inline `.await` here
    // would block `stream.next()` from ever being polled until the turn finished
    // on its own (§5 "all suspension points MUST observe cancellation within
    // bounded time").
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        // §5: frames are processed strictly in arrival order, so the
                        // previous turn must finish before this one starts.
                        if let Some(handle) = in_flight.take() {
                            let _ = handle.await;
                        }
                        let ctx = turn_ctx.clone();
                        let tx = tx.clone();
                        let cancel = cancel.clone();
                        in_flight = Some(tokio::spawn(async move {
                            process_client_message(&ctx, &text, &tx, &cancel).await;
                        }));
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::debug!(cause = %err, "websocket receive error, closing connection");
                        break;
                    }
                }
            }
        }
    }

    // Client disconnect or receive error: trip the connection's cancellation scope,
    // which the in-flight turn's `process_client_message`/`process_stream` select
    // loops observe directly. No partial frames are re-sent; no new frames are
    // written after this point.
    cancel.cancel();
    if let Some(handle) = in_flight.take() {
        let _ = handle.await;
    }
    let _ = writer.await;
}
