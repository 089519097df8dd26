// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote-node registry implementing [`Federation`] (spec §4.9, component C9).
//!
//! HQ mode only: holds one [`RemoteEntry`] per registered remote, polls
//! `/api/health` every 10 s, and evicts a remote after 3 consecutive
//! failures. Unreachable remotes are not dropped from the session list —
//! their cached sessions stay visible with `active: false` (spec §6 S6).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vibetunnel_core::error::ErrorCode;
use vibetunnel_core::federation::{Federation, ProxiedResponse, RemoteSummary};
use vibetunnel_core::session::SessionView;

use crate::client::RemoteClient;

/// Interval between `/api/health` heartbeats.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive failures before a remote is evicted.
const MAX_HEALTH_FAILURES: u32 = 3;

struct RemoteEntry {
    client: RemoteClient,
    url: String,
    healthy: AtomicBool,
    failures: AtomicU32,
    sessions: RwLock<Vec<SessionView>>,
}

/// HQ's view of the cluster: a registry of remotes plus their last-known
/// session lists, consulted by the HTTP/WS API layer (C8) through the
/// `Federation` trait object.
pub struct Registry {
    remotes: RwLock<HashMap<String, Arc<RemoteEntry>>>,
    shutdown: CancellationToken,
}

impl Registry {
    pub fn new(shutdown: CancellationToken) -> Arc<Self> {
        let registry = Arc::new(Self { remotes: RwLock::new(HashMap::new()), shutdown });
        registry.clone().spawn_health_checker();
        registry
    }

    fn spawn_health_checker(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }
                if self.shutdown.is_cancelled() {
                    // Suppress further remote-facing calls once the server is
                    // draining (spec §4.11).
                    break;
                }
                self.check_all().await;
            }
        });
    }

    async fn check_all(&self) {
        let snapshot: Vec<(String, Arc<RemoteEntry>)> =
            self.remotes.read().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (name, entry) in snapshot {
            match entry.client.health().await {
                Ok(()) => {
                    entry.healthy.store(true, Ordering::Release);
                    entry.failures.store(0, Ordering::Release);
                }
                Err(err) => {
                    entry.healthy.store(false, Ordering::Release);
                    let count = entry.failures.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(remote = %name, failures = count, error = %err, "remote health check failed");
                    if count >= MAX_HEALTH_FAILURES {
                        warn!(remote = %name, "evicting remote after repeated health failures");
                        self.remotes.write().await.remove(&name);
                    }
                }
            }
        }
    }

    async fn find_owner(&self, session_id: &str) -> Option<Arc<RemoteEntry>> {
        let remotes = self.remotes.read().await;
        for entry in remotes.values() {
            if entry.sessions.read().await.iter().any(|s| s.id == session_id) {
                return Some(entry.clone());
            }
        }
        None
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl Federation for Registry {
    fn list_remotes(&self) -> BoxFuture<'_, Vec<RemoteSummary>> {
        Box::pin(async move {
            self.remotes
                .read()
                .await
                .iter()
                .map(|(name, entry)| RemoteSummary {
                    name: name.clone(),
                    url: entry.url.clone(),
                    healthy: entry.healthy.load(Ordering::Acquire),
                })
                .collect()
        })
    }

    fn register_remote(
        &self,
        name: String,
        url: String,
        token: String,
    ) -> BoxFuture<'_, Result<(), ErrorCode>> {
        Box::pin(async move {
            let entry = Arc::new(RemoteEntry {
                client: RemoteClient::new(url.clone(), token),
                url,
                healthy: AtomicBool::new(true),
                failures: AtomicU32::new(0),
                sessions: RwLock::new(Vec::new()),
            });
            self.remotes.write().await.insert(name.clone(), entry.clone());
            info!(remote = %name, "registered remote");
            if let Ok(sessions) = entry.client.list_sessions().await {
                *entry.sessions.write().await = sessions;
            }
            Ok(())
        })
    }

    fn refresh_sessions(&self, remote_name: &str) -> BoxFuture<'_, Result<(), ErrorCode>> {
        let remote_name = remote_name.to_owned();
        Box::pin(async move {
            let entry = self.remotes.read().await.get(&remote_name).cloned().ok_or(ErrorCode::NotFound)?;
            match entry.client.list_sessions().await {
                Ok(sessions) => {
                    *entry.sessions.write().await = sessions;
                    entry.healthy.store(true, Ordering::Release);
                    entry.failures.store(0, Ordering::Release);
                    Ok(())
                }
                Err(_) => {
                    entry.healthy.store(false, Ordering::Release);
                    Err(ErrorCode::UpstreamUnreachable)
                }
            }
        })
    }

    fn owns_session(&self, session_id: &str) -> BoxFuture<'_, bool> {
        let session_id = session_id.to_owned();
        Box::pin(async move { self.find_owner(&session_id).await.is_some() })
    }

    fn list_sessions(&self) -> BoxFuture<'_, Vec<SessionView>> {
        Box::pin(async move {
            let remotes = self.remotes.read().await;
            let mut out = Vec::new();
            for entry in remotes.values() {
                let healthy = entry.healthy.load(Ordering::Acquire);
                for mut view in entry.sessions.read().await.clone() {
                    if !healthy {
                        view.active = false;
                        view.is_active = false;
                    }
                    out.push(view);
                }
            }
            out
        })
    }

    fn proxy_request(
        &self,
        session_id: &str,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> BoxFuture<'_, Result<ProxiedResponse, ErrorCode>> {
        let session_id = session_id.to_owned();
        let path = path.to_owned();
        Box::pin(async move {
            let entry = self.find_owner(&session_id).await.ok_or(ErrorCode::NotFound)?;
            let (status, headers, body) = entry.client.proxy(method, &path, headers, body).await?;
            Ok(ProxiedResponse { status: status.as_u16(), headers, body })
        })
    }

    fn bridge_websocket(
        &self,
        session_id: &str,
        ws_path: &str,
    ) -> BoxFuture<'_, Result<(mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>), ErrorCode>> {
        let session_id = session_id.to_owned();
        let ws_path = ws_path.to_owned();
        Box::pin(async move {
            let entry = self.find_owner(&session_id).await.ok_or(ErrorCode::NotFound)?;
            let url = entry.client.ws_url(&ws_path);
            let token = entry.client.token().to_owned();

            let mut request = url.into_client_request().map_err(|_| ErrorCode::UpstreamUnreachable)?;
            let auth_value = tokio_tungstenite::tungstenite::http::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ErrorCode::UpstreamUnreachable)?;
            request.headers_mut().insert("Authorization", auth_value);
            let (upstream, _response) =
                tokio_tungstenite::connect_async(request).await.map_err(|_| ErrorCode::UpstreamUnreachable)?;
            let (mut upstream_tx, mut upstream_rx) = upstream.split();

            let (to_upstream_tx, mut to_upstream_rx) = mpsc::channel::<Vec<u8>>(64);
            let (from_upstream_tx, from_upstream_rx) = mpsc::channel::<Vec<u8>>(64);

            tokio::spawn(async move {
                while let Some(bytes) = to_upstream_rx.recv().await {
                    if upstream_tx.send(tokio_tungstenite::tungstenite::Message::Binary(bytes.into())).await.is_err() {
                        break;
                    }
                }
            });
            tokio::spawn(async move {
                while let Some(Ok(message)) = upstream_rx.next().await {
                    if let tokio_tungstenite::tungstenite::Message::Binary(bytes) = message {
                        if from_upstream_tx.send(bytes.to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            });

            Ok((to_upstream_tx, from_upstream_rx))
        })
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
