// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S1 (echo), S2 (resize), S3 (kill) from spec §8.

use std::time::Duration;

use vibetunnel_specs::{create_session, read_stream_prefix, wait_for_session, wait_for_stream_contains, ServeProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn s1_echo() -> anyhow::Result<()> {
    let server = ServeProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let id = create_session(&client, &server.base_url(), &["sh", "-c", "printf hello"], 80, 24).await?;

    wait_for_stream_contains(&client, &server.base_url(), &id, "hello", Duration::from_millis(500)).await?;

    let view =
        wait_for_session(&client, &server.base_url(), &id, TIMEOUT, |v| v["status"] == "exited").await?;
    assert_eq!(view["exit_code"], 0);

    Ok(())
}

#[tokio::test]
async fn s2_resize() -> anyhow::Result<()> {
    let server = ServeProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let id = create_session(
        &client,
        &server.base_url(),
        &["sh", "-c", "i=0; while true; do i=$((i+1)); echo tick-$i; sleep 0.05; done"],
        80,
        24,
    )
    .await?;

    // Let a few output events land before resizing, so the ordering check
    // below has something to compare against.
    tokio::time::sleep(Duration::from_millis(200)).await;

    client
        .post(format!("{}/api/sessions/{id}/resize", server.base_url()))
        .json(&serde_json::json!({"cols": 120, "rows": 40}))
        .send()
        .await?
        .error_for_status()?;

    wait_for_session(&client, &server.base_url(), &id, Duration::from_secs(1), |v| {
        v["cols"] == 120 && v["rows"] == 40
    })
    .await?;

    // Let more ticks land after the resize, then check ordering in the replay.
    let body = read_stream_prefix(&client, &server.base_url(), &id, Duration::from_millis(600)).await?;

    let resize_pos = body.find(",120,40]").ok_or_else(|| anyhow::anyhow!("no resize(120,40) event in stream"))?;
    let output_after_resize = body[resize_pos..].find("tick-");
    assert!(output_after_resize.is_some(), "expected a later output event after the resize event");

    let _ = client.delete(format!("{}/api/sessions/{id}", server.base_url())).send().await;
    Ok(())
}

#[tokio::test]
async fn s3_kill() -> anyhow::Result<()> {
    let server = ServeProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let id = create_session(&client, &server.base_url(), &["sleep", "60"], 80, 24).await?;

    client.delete(format!("{}/api/sessions/{id}", server.base_url())).send().await?.error_for_status()?;

    let view = wait_for_session(&client, &server.base_url(), &id, Duration::from_secs(3), |v| {
        v["status"] == "exited"
    })
    .await?;
    assert_eq!(view["exit_code"], 143);

    let resp = client
        .post(format!("{}/api/sessions/{id}/input", server.base_url()))
        .json(&serde_json::json!({"text": "x"}))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 409);

    Ok(())
}
