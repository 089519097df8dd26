// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! S5 (external session) from spec §8: a session descriptor written
//! directly into the control directory, from outside the server process,
//! is discovered and later forgotten as the directory comes and goes.

use std::time::Duration;

use vibetunnel_core::recording::{self, SessionMetadata, SessionStatus};
use vibetunnel_specs::ServeProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn sessions_list_has(client: &reqwest::Client, base_url: &str, id: &str) -> anyhow::Result<bool> {
    let resp = client.get(format!("{base_url}/api/sessions")).send().await?;
    anyhow::ensure!(resp.status().is_success());
    let views: serde_json::Value = resp.json().await?;
    Ok(views.as_array().is_some_and(|list| list.iter().any(|v| v["id"] == id)))
}

async fn wait_until(client: &reqwest::Client, base_url: &str, id: &str, want_present: bool, timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("session {id} presence={want_present} never observed within {timeout:?}");
        }
        if sessions_list_has(client, base_url, id).await? == want_present {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn s5_external_session_appears_and_disappears() -> anyhow::Result<()> {
    let server = ServeProcess::start()?;
    server.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let dir = server.control_dir().join("ext-1");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("stdout"), b"")?;

    let meta = SessionMetadata {
        id: "ext-1".to_owned(),
        name: None,
        command: vec!["sh".to_owned()],
        cwd: None,
        cols: 80,
        rows: 24,
        status: SessionStatus::Running,
        created_at: 0,
        pid: None,
        exit_code: None,
    };
    recording::write_session_json_atomic(&dir, &meta)?;

    wait_until(&client, &server.base_url(), "ext-1", true, Duration::from_secs(2)).await?;

    std::fs::remove_dir_all(&dir)?;
    wait_until(&client, &server.base_url(), "ext-1", false, Duration::from_secs(2)).await?;

    Ok(())
}
