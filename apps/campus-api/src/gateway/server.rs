//! WebSocket upgrade handler and per-connection event loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use super::core::Gateway;
use super::events::{parse_frame, AuthPayload, EventName, ServerFrame};
use super::session::Connection;
use crate::error::{codes, GatewayError};
use crate::AppState;

/// Close codes (4000-range for application-level).
pub const CLOSE_UNKNOWN_ERROR: u16 = 4000;
pub const CLOSE_AUTH_FAILED: u16 = 4004;
pub const CLOSE_SESSION_TIMEOUT: u16 = 4009;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.get("token").cloned());

    ws.on_upgrade(move |socket| handle_connection(socket, state, token))
}

async fn handle_connection(socket: WebSocket, state: AppState, token: Option<String>) {
    let gateway = state.gateway.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let auth_timeout = Duration::from_secs(state.config.auth_timeout_secs);

    // PENDING_AUTH: verify the upgrade credential, or wait for an auth frame.
    let verified = time::timeout(auth_timeout, async {
        match token {
            Some(token) => gateway.authenticate(Some(&token)).await,
            None => {
                let token = read_auth_frame(&mut ws_rx).await?;
                gateway.authenticate(Some(&token)).await
            }
        }
    })
    .await;

    let user = match verified {
        Ok(Ok(user)) => user,
        Ok(Err(err)) => {
            tracing::debug!(%err, "gateway authentication failed");
            let _ = send_frame(&mut ws_tx, &ServerFrame::error(&err)).await;
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Authentication failed").await;
            return;
        }
        Err(_elapsed) => {
            tracing::debug!("gateway authentication timed out");
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Authentication timeout").await;
            return;
        }
    };

    let (conn, outbound_rx) = match gateway.open(user).await {
        Ok(opened) => opened,
        Err(err) => {
            tracing::error!(?err, "failed to open gateway connection");
            let _ = send_frame(&mut ws_tx, &ServerFrame::error(&err)).await;
            let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Internal error").await;
            return;
        }
    };
    let ping_interval = Duration::from_secs(state.config.ping_interval_secs.max(1));
    run_session(&gateway, &conn, ws_tx, ws_rx, outbound_rx, ping_interval).await;

    gateway.close(&conn);
    tracing::debug!(conn_id = %conn.id, state = ?conn.state(), "gateway session ended");
}

/// Wait for `{"event":"auth","data":{"token":...}}`. Control frames are
/// skipped; anything else fails authentication.
async fn read_auth_frame(ws_rx: &mut WsStream) -> Result<String, GatewayError> {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                return Err(GatewayError::authentication("Connection closed before auth"))
            }
            Ok(Message::Binary(_)) => {
                return Err(GatewayError::authentication("Expected an auth frame"))
            }
            Err(e) => {
                tracing::debug!(?e, "ws read error during auth");
                return Err(GatewayError::authentication("Connection error before auth"));
            }
        };

        let frame = parse_frame(&text)
            .map_err(|_| GatewayError::authentication("Expected an auth frame"))?;
        if frame.event != EventName::AUTH {
            return Err(GatewayError::authentication("Expected an auth frame"));
        }
        let payload: AuthPayload = serde_json::from_value(frame.data)
            .map_err(|_| GatewayError::authentication("Invalid auth payload"))?;
        return Ok(payload.token);
    }
    Err(GatewayError::authentication("Connection closed before auth"))
}

/// AUTHENTICATED phase. A writer task owns the socket sink: it drains the
/// outbound queue and runs the ping/liveness timer. This task reads, and
/// handles each inbound frame to completion before reading the next, so a
/// connection's events are processed strictly in arrival order while its
/// outbound queue keeps draining.
async fn run_session(
    gateway: &Gateway,
    conn: &Arc<Connection>,
    ws_tx: WsSink,
    mut ws_rx: WsStream,
    outbound_rx: mpsc::Receiver<Arc<ServerFrame>>,
    ping_interval: Duration,
) {
    let last_seen = Arc::new(Mutex::new(Instant::now()));
    let mut writer = tokio::spawn(write_loop(
        conn.id.clone(),
        ws_tx,
        outbound_rx,
        ping_interval,
        last_seen.clone(),
    ));

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        *last_seen.lock() = Instant::now();
                        gateway.handle_text(conn, &text).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        *last_seen.lock() = Instant::now();
                    }
                    Some(Ok(Message::Binary(_))) => {
                        *last_seen.lock() = Instant::now();
                        gateway.report(
                            conn,
                            GatewayError::validation(codes::INVALID_PAYLOAD, "Binary frames are not supported"),
                        );
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, conn_id = %conn.id, "ws read error");
                        break;
                    }
                }
            }

            // The writer stops on a send failure or a liveness timeout.
            _ = &mut writer => break,
        }
    }

    writer.abort();
}

/// Drain the outbound queue into the socket and keep the connection alive.
async fn write_loop(
    conn_id: String,
    mut ws_tx: WsSink,
    mut outbound_rx: mpsc::Receiver<Arc<ServerFrame>>,
    ping_interval: Duration,
    last_seen: Arc<Mutex<Instant>>,
) {
    let mut ping_timer = time::interval(ping_interval);
    ping_timer.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                if send_frame(&mut ws_tx, &frame).await.is_err() {
                    break;
                }
            }

            _ = ping_timer.tick() => {
                let idle = last_seen.lock().elapsed();
                if idle > ping_interval * 2 {
                    tracing::debug!(%conn_id, "liveness timeout, closing connection");
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Liveness timeout").await;
                    break;
                }
                if ws_tx.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_frame(ws_tx: &mut WsSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(?err, event = %frame.event, "failed to serialize frame");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
