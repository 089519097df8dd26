// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote-mode self-registration client (spec §4.9): on boot, and on every
//! local session create/delete, tell HQ about this node so its listing
//! stays fresh without waiting a full heartbeat.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vibetunnel_core::session::Manager;

/// Initial reconnect backoff; doubles on each consecutive failure up to
/// [`MAX_BACKOFF`], same shape as the HQ→remote WS bridge reconnect
/// (grounded on the teacher's upstream bridge loop).
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Registers this node with HQ and re-notifies it on every local session
/// change (spec §4.9's one-change visibility guarantee).
pub struct RemoteAgent {
    hq_url: String,
    hq_token: String,
    name: String,
    self_url: String,
    http: Client,
}

impl RemoteAgent {
    pub fn new(hq_url: String, hq_token: String, name: String, self_url: String) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(10)).build().unwrap_or_default();
        Self { hq_url: hq_url.trim_end_matches('/').to_owned(), hq_token, name, self_url, http }
    }

    async fn register(&self) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/api/remotes", self.hq_url))
            .bearer_auth(&self.hq_token)
            .json(&serde_json::json!({"name": self.name, "url": self.self_url, "token": self.hq_token}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn notify_change(&self) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/api/remotes/{}/refresh-sessions", self.hq_url, self.name))
            .bearer_auth(&self.hq_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Register with HQ (retrying with exponential backoff until it
    /// succeeds or the server starts shutting down), then re-notify HQ on
    /// every subsequent local session change until shutdown.
    pub async fn run(self: Arc<Self>, manager: Arc<Manager>, shutdown: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.register().await {
                Ok(()) => break,
                Err(err) => {
                    warn!(error = %err, backoff_ms = backoff.as_millis(), "failed to register with hq, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        debug!(name = %self.name, "registered with hq");

        let changed = manager.change_notify();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = changed.notified() => {}
            }
            if shutdown.is_cancelled() {
                return;
            }
            if let Err(err) = self.notify_change().await {
                debug!(error = %err, "failed to notify hq of session change");
            }
        }
    }
}
