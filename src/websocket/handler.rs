use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::connection_manager::ConnectionHandle;
use crate::metrics::{
    HeartbeatMetrics, WsMessageMetrics, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED,
    WS_CONNECTION_DURATION,
};
use crate::server::{extract_bearer_token, AppState};

use super::control;
use super::heartbeat::HeartbeatMonitor;
use super::message::{ClientMessage, OutboundMessage, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// A token is optional. An invalid one is logged and the client is admitted
/// anonymously; it can still `authenticate` in-band later.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let user_id = resolve_identity(&state, &query, &headers);

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        serve_connection(sink, stream, state, user_id).await;
    })
}

/// Token from the `token` query parameter, then the Authorization header
fn resolve_identity(state: &AppState, query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    let token = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| extract_bearer_token(headers))?;

    match state.tokens.validate(token) {
        Ok(claims) => Some(claims.sub),
        Err(e) => {
            tracing::warn!(error = %e, "Connect token rejected, continuing anonymously");
            None
        }
    }
}

/// Drive one client from admission to disconnect.
///
/// Generic over the socket halves so the full loop can run against in-memory
/// channels.
#[tracing::instrument(
    name = "ws.connection",
    skip_all,
    fields(user_id = user_id.as_deref().unwrap_or("anonymous"), otel.kind = "server")
)]
pub async fn serve_connection<W, R, E>(
    mut sink: W,
    mut stream: R,
    state: AppState,
    user_id: Option<String>,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    let connection_start = Instant::now();
    // Subscribe before admission so a shutdown racing the handshake is not missed
    let mut shutdown = state.shutdown_tx.subscribe();
    let (tx, rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.outbound_queue_size);

    let handle = match state.connections.connect(tx, user_id) {
        Ok(handle) => handle,
        Err(e) => {
            let error_msg = ServerMessage::error("CONNECTION_LIMIT", e.to_string());
            if let Ok(json) = serde_json::to_string(&error_msg) {
                let _ = sink.send(Message::Text(json.into())).await;
            }
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "Connection limit reached".into(),
                })))
                .await;
            let _ = sink.close().await;
            return;
        }
    };
    let connection_id = handle.id;

    WS_CONNECTIONS_OPENED.inc();

    let writer = tokio::spawn(write_loop(sink, rx, handle.closed_signal()));

    state.connections.send_to(
        connection_id,
        ServerMessage::connected(
            connection_id,
            handle.is_authenticated(),
            state.settings.websocket.heartbeat_interval,
        )
        .into(),
    );

    let mut monitor = HeartbeatMonitor::new(state.settings.websocket.receive_timeout());
    let mut closed = handle.closed_signal();

    loop {
        if *closed.borrow() {
            break;
        }

        tokio::select! {
            _ = closed.changed() => break,
            _ = shutdown.recv() => {
                tracing::debug!(connection_id = %connection_id, "Shutdown signal received");
                break;
            }
            frame = tokio::time::timeout(monitor.receive_timeout(), stream.next()) => {
                match frame {
                    Err(_) => {
                        let heartbeat = ServerMessage::heartbeat(state.connections.connection_count());
                        let sent = state.connections.send_to(connection_id, heartbeat.into());
                        if sent {
                            HeartbeatMetrics::record_sent();
                        } else {
                            HeartbeatMetrics::record_failure();
                        }
                        monitor.on_timeout(sent);
                        tracing::debug!(
                            connection_id = %connection_id,
                            missed = monitor.missed(),
                            "Receive window idle, heartbeat sent"
                        );
                        if monitor.is_dead() {
                            tracing::info!(connection_id = %connection_id, "Heartbeat failed");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                        break;
                    }
                    Ok(Some(Ok(msg))) => {
                        monitor.on_frame();
                        handle.touch();
                        if !process_frame(msg, &state, &handle).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    state.connections.disconnect(connection_id);
    let _ = writer.await;

    WS_CONNECTIONS_CLOSED.inc();
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Drains the outbound queue onto the socket until the connection is closed,
/// flushing anything still queued at that point before the close frame.
async fn write_loop<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut closed: watch::Receiver<bool>,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    loop {
        if *closed.borrow() {
            break;
        }

        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if !send_outbound(&mut sink, msg).await {
                    return;
                }
            }
            changed = closed.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    while let Ok(msg) = rx.try_recv() {
        if !send_outbound(&mut sink, msg).await {
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

async fn send_outbound<W>(sink: &mut W, msg: OutboundMessage) -> bool
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let text = match msg.to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize message");
            return true;
        }
    };

    match sink.send(Message::Text(text.into())).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "WebSocket send failed");
            false
        }
    }
}

/// Handle one inbound frame. Returns false if the connection should be closed.
async fn process_frame(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    let reply = match msg {
        Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(client_msg) => control::dispatch(client_msg, state, handle).await,
            Err(e) => {
                WsMessageMetrics::record_invalid();
                tracing::debug!(connection_id = %handle.id, error = %e, "Unparseable client frame");
                ServerMessage::error("INVALID_MESSAGE", e.to_string())
            }
        },
        Message::Binary(_) => ServerMessage::error(
            "UNSUPPORTED_FORMAT",
            "Binary messages are not supported",
        ),
        // Protocol pings are answered by the transport
        Message::Ping(_) | Message::Pong(_) => return true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            return false;
        }
    };

    state.broker.send_to_connection(handle.id, reply);
    true
}
