// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S4 (fan-out) from spec §8: two `/ws/buffers` subscribers to the same
//! session never diverge on what they've seen, up to coalescing windows.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use vibetunnel_specs::{create_session, decode_buffer_message, frame_text, ServeProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

type BufferSocket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn subscribe(ws_url: &str, session_id: &str) -> anyhow::Result<BufferSocket> {
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url).await?;
    ws.send(Message::Text(serde_json::json!({"subscribe": session_id}).to_string().into())).await?;
    Ok(ws)
}

async fn next_frame_containing(
    ws: &mut BufferSocket,
    session_id: &str,
    needle: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("never received a {session_id} snapshot containing {needle:?}");
        }
        let Some(Ok(Message::Binary(bytes))) =
            tokio::time::timeout(Duration::from_millis(500), ws.next()).await.ok().flatten()
        else {
            continue;
        };
        let decoded = decode_buffer_message(&bytes)?;
        if decoded.session_id == session_id && frame_text(&decoded.frame).contains(needle) {
            return Ok(());
        }
    }
}

#[tokio::test]
async fn s4_fanout_to_two_subscribers() -> anyhow::Result<()> {
    let server = ServeProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let id = create_session(&client, &server.base_url(), &["cat"], 80, 24).await?;

    let ws_url = server.ws_buffers_url();
    let mut sub_a = subscribe(&ws_url, &id).await?;
    let mut sub_b = subscribe(&ws_url, &id).await?;

    client
        .post(format!("{}/api/sessions/{id}/input", server.base_url()))
        .json(&serde_json::json!({"text": "abc\n"}))
        .send()
        .await?
        .error_for_status()?;

    next_frame_containing(&mut sub_a, &id, "abc", TIMEOUT).await?;
    next_frame_containing(&mut sub_b, &id, "abc", TIMEOUT).await?;

    Ok(())
}
