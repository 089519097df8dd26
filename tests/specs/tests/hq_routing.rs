// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S6 (HQ routing) from spec §8: HQ serves the same JSON as the remote that
//! actually runs a session, keeps showing it (as inactive) once the remote
//! goes unreachable, and refuses mutating calls against it.

use std::time::Duration;

use vibetunnel_specs::{create_session, wait_for_session, ServeProcess};

const TIMEOUT: Duration = Duration::from_secs(10);
const SHARED_TOKEN: &str = "shared-remote-token";

#[tokio::test]
async fn s6_hq_proxies_and_degrades_gracefully() -> anyhow::Result<()> {
    let hq = ServeProcess::start()?;
    hq.wait_healthy(TIMEOUT).await?;

    let remote = ServeProcess::build()
        .auth_token(SHARED_TOKEN)
        .hq(&hq.base_url(), SHARED_TOKEN, "remote-r")
        .spawn()?;
    remote.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let session_id = create_session(&client, &remote.base_url(), &["sleep", "60"], 80, 24).await?;

    // The remote self-registers and re-notifies HQ on every local session
    // change, so HQ's cache should pick the new session up quickly.
    wait_for_session(&client, &hq.base_url(), &session_id, TIMEOUT, |_| true).await?;

    let on_hq: serde_json::Value =
        client.get(format!("{}/api/sessions/{session_id}", hq.base_url())).send().await?.json().await?;
    let on_remote: serde_json::Value =
        client.get(format!("{}/api/sessions/{session_id}", remote.base_url())).send().await?.json().await?;
    assert_eq!(on_hq["id"], on_remote["id"]);
    assert_eq!(on_hq["status"], on_remote["status"]);
    assert_eq!(on_hq["cols"], on_remote["cols"]);
    assert_eq!(on_hq["rows"], on_remote["rows"]);

    // Stop the remote; HQ's health checker marks it unhealthy after its
    // first failed heartbeat (eviction only happens after three in a row),
    // so the cached session stays listed but inactive in that window.
    drop(remote);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(25);
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("session never went inactive on HQ after the remote stopped");
        }
        let resp = client.get(format!("{}/api/sessions", hq.base_url())).send().await?;
        let list: serde_json::Value = resp.json().await?;
        let entry = list.as_array().and_then(|l| l.iter().find(|v| v["id"] == session_id));
        if let Some(entry) = entry {
            if entry["active"] == false {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let resp = client
        .delete(format!("{}/api/sessions/{session_id}", hq.base_url()))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 502);

    Ok(())
}
