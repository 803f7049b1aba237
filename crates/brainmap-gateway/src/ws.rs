//! WebSocket session handling
//!
//! A session gets the full state and the AI status on connect, then every
//! broadcast in order. Inbound frames are parsed as `ClientMessage`; anything
//! else is dropped with a warning and the session stays open.

use crate::handlers::handle_message;
use crate::server::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use brainmap_agent::Attachment;
use brainmap_core::{ClientMessage, ServerMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocket, WsMessage>;

pub async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let session_id = state.sessions.register();
    info!("Session {} connected ({} active)", session_id, state.sessions.count());

    let (ws_tx, ws_rx) = socket.split();
    run_session(&session_id, ws_tx, ws_rx, &state).await;

    state.sessions.remove(&session_id);
    info!("Session {} disconnected ({} active)", session_id, state.sessions.count());
}

async fn send(tx: &mut WsSink, msg: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => tx.send(WsMessage::Text(json)).await,
        Err(e) => {
            error!("Failed to serialize outbound message: {}", e);
            Ok(())
        }
    }
}

/// Send a fresh snapshot and return a receiver positioned right after it.
async fn resync(tx: &mut WsSink, state: &AppState) -> Option<broadcast::Receiver<ServerMessage>> {
    let Attachment {
        state: snapshot,
        name,
        events,
    } = state.store.attach().await;
    send(tx, &ServerMessage::full_state(snapshot, name)).await.ok()?;
    Some(events)
}

async fn run_session(
    session_id: &str,
    mut ws_tx: WsSink,
    mut ws_rx: SplitStream<WebSocket>,
    state: &Arc<AppState>,
) {
    let Some(mut events) = resync(&mut ws_tx, state).await else {
        return;
    };
    if send(&mut ws_tx, &ServerMessage::AiStatus(state.model.status().await))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(parsed) => {
                            debug!("Session {}: {}", session_id, parsed.kind());
                            for reply in handle_message(parsed, state).await {
                                if send(&mut ws_tx, &reply).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let preview: String = text.chars().take(100).collect();
                            warn!("Session {}: dropped malformed message ({}): {}", session_id, e, preview);
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => return,
                    Some(Err(e)) => {
                        warn!("Session {}: WebSocket error: {}", session_id, e);
                        return;
                    }
                    _ => {} // Binary, Ping, Pong
                }
            }

            event = events.recv() => {
                match event {
                    Ok(msg) => {
                        if send(&mut ws_tx, &msg).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Session {} lagged by {} events, resending full state", session_id, n);
                        match resync(&mut ws_tx, state).await {
                            Some(fresh) => events = fresh,
                            None => return,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event stream closed");
                        return;
                    }
                }
            }
        }
    }
}
