// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket handlers: keystroke input and the multiplexed buffer feed
//! (spec §6, component C8 atop C7's fan-out).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{InputPayload, SpecialKey};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputMessage {
    Text { text: String },
    Key { key: SpecialKey },
}

/// Pull UTF-8 text out of a client frame regardless of whether it arrived as
/// `Text` (a direct browser client) or `Binary` (relayed through
/// [`crate::federation::Federation::bridge_websocket`], which only carries
/// binary frames end to end).
fn frame_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.to_string()),
        Message::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok(),
        _ => None,
    }
}

/// `GET /ws/input/:id`: client sends `{text}`/`{key}` JSON frames, one
/// keystroke batch per message; the server never writes back (spec §6).
pub async fn input_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_input_socket(socket, state, id))
}

/// A session HQ doesn't run locally is bridged to whichever remote owns it
/// rather than handled against the local manager (spec §4.9).
async fn bridge_input(state: &AppState, id: &str) -> Option<mpsc::Sender<Vec<u8>>> {
    let federation = state.federation.as_ref()?;
    if !federation.owns_session(id).await {
        return None;
    }
    match federation.bridge_websocket(id, &format!("/ws/input/{id}")).await {
        Ok((tx, _rx)) => Some(tx),
        Err(err) => {
            debug!(session_id = %id, error = %err, "failed to bridge ws/input to remote");
            None
        }
    }
}

async fn handle_input_socket(mut socket: WebSocket, state: Arc<AppState>, id: String) {
    let remote_tx = if state.manager.get(&id).await.is_err() {
        let Some(tx) = bridge_input(&state, &id).await else { return };
        Some(tx)
    } else {
        None
    };

    while let Some(Ok(message)) = socket.recv().await {
        let Some(text) = frame_text(message) else { continue };

        if let Some(tx) = &remote_tx {
            if tx.send(text.into_bytes()).await.is_err() {
                break;
            }
            continue;
        }

        let parsed: Result<InputMessage, _> = serde_json::from_str(&text);
        let payload = match parsed {
            Ok(InputMessage::Text { text }) => InputPayload::Text(text),
            Ok(InputMessage::Key { key }) => InputPayload::Key(key),
            Err(err) => {
                debug!(session_id = %id, error = %err, "dropping malformed ws/input frame");
                continue;
            }
        };
        if state.manager.input(&id, payload).await.is_err() {
            break;
        }
    }
}

#[derive(Debug, Deserialize)]
enum BuffersControl {
    #[serde(rename = "subscribe")]
    Subscribe(String),
    #[serde(rename = "unsubscribe")]
    Unsubscribe(String),
}

/// `GET /ws/buffers`: one socket multiplexes any number of session
/// subscriptions using the 0xBF framing (spec §4.7/§6).
pub async fn buffers_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_buffers_socket(socket, state))
}

/// One multiplexed subscription: either this node's own fan-out, or a
/// bridged subscription running against the remote that actually owns the
/// session (spec §4.9).
enum Subscription {
    Local(Arc<crate::fanout::Subscriber>, tokio::task::JoinHandle<()>),
    Remote(mpsc::Sender<Vec<u8>>, tokio::task::JoinHandle<()>),
}

async fn teardown(state: &AppState, session_id: &str, sub: Subscription) {
    match sub {
        Subscription::Local(subscriber, task) => {
            task.abort();
            state.manager.fanout().unsubscribe(session_id, subscriber.id());
        }
        Subscription::Remote(tx, task) => {
            let control = serde_json::json!({"unsubscribe": session_id}).to_string().into_bytes();
            let _ = tx.send(control).await;
            task.abort();
        }
    }
}

async fn handle_buffers_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<bytes::Bytes>(256);
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                let Some(text) = frame_text(message) else { continue };
                match serde_json::from_str::<BuffersControl>(&text) {
                    Ok(BuffersControl::Subscribe(session_id)) => {
                        if subscriptions.contains_key(&session_id) {
                            continue;
                        }
                        if state.manager.get(&session_id).await.is_ok() {
                            let (subscriber, _initial) = state.manager.fanout().subscribe(&session_id);
                            let tx = outbound_tx.clone();
                            let sub_for_task = subscriber.clone();
                            let task = tokio::spawn(async move {
                                loop {
                                    let frame = sub_for_task.recv().await;
                                    if tx.send(frame).await.is_err() {
                                        break;
                                    }
                                }
                            });
                            subscriptions.insert(session_id, Subscription::Local(subscriber, task));
                        } else if let Some(sub) = bridge_buffers(&state, &session_id, &outbound_tx).await {
                            subscriptions.insert(session_id, sub);
                        } else {
                            debug!(session_id = %session_id, "subscribe request for unknown session");
                        }
                    }
                    Ok(BuffersControl::Unsubscribe(session_id)) => {
                        if let Some(sub) = subscriptions.remove(&session_id) {
                            teardown(&state, &session_id, sub).await;
                        }
                    }
                    Err(err) => debug!(error = %err, "dropping malformed ws/buffers control frame"),
                }
            }
            Some(frame) = outbound_rx.recv() => {
                if socket.send(Message::Binary(frame)).await.is_err() {
                    break;
                }
            }
            else => break,
        }
    }

    for (session_id, sub) in subscriptions {
        teardown(&state, &session_id, sub).await;
    }
}

/// A session HQ doesn't run locally is bridged to whichever remote owns it,
/// relaying its 0xBF-framed snapshots straight through (spec §4.9).
async fn bridge_buffers(
    state: &AppState,
    session_id: &str,
    outbound_tx: &mpsc::Sender<bytes::Bytes>,
) -> Option<Subscription> {
    let federation = state.federation.as_ref()?;
    if !federation.owns_session(session_id).await {
        return None;
    }
    let (tx, mut rx) = match federation.bridge_websocket(session_id, "/ws/buffers").await {
        Ok(pair) => pair,
        Err(err) => {
            debug!(session_id = %session_id, error = %err, "failed to bridge ws/buffers to remote");
            return None;
        }
    };

    let control = serde_json::json!({"subscribe": session_id}).to_string().into_bytes();
    if tx.send(control).await.is_err() {
        return None;
    }

    let outbound_tx = outbound_tx.clone();
    let task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if outbound_tx.send(frame.into()).await.is_err() {
                break;
            }
        }
    });
    Some(Subscription::Remote(tx, task))
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
