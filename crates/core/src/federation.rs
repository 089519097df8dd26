// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Federation plug-in point (spec §4.9, component C9).
//!
//! `vibetunnel-core` never links against `vibetunnel-hq` — the dependency
//! runs the other way, so this crate can be embedded standalone. Instead
//! the HTTP layer holds an `Option<Arc<dyn Federation>>`: absent in
//! standalone mode, and implemented by `vibetunnel_hq::Registry` when the
//! process is booted in `hq` mode.

use std::future::Future;
use std::pin::Pin;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::session::SessionView;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A remote node as HQ reports it back to API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSummary {
    pub name: String,
    pub url: String,
    pub healthy: bool,
}

/// A raw HTTP response proxied back from a remote, verbatim (spec §4.9:
/// method, path, headers, and body forwarded as-is; response streamed back).
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The HQ-side operations the HTTP/WS API (C8) needs without depending on
/// `vibetunnel-hq` directly.
pub trait Federation: Send + Sync {
    /// All currently registered remotes.
    fn list_remotes(&self) -> BoxFuture<'_, Vec<RemoteSummary>>;

    /// Register a new remote (`POST /api/remotes`).
    fn register_remote(
        &self,
        name: String,
        url: String,
        token: String,
    ) -> BoxFuture<'_, Result<(), ErrorCode>>;

    /// A remote is telling HQ its session set changed
    /// (`POST /api/remotes/:name/refresh-sessions`); HQ re-polls it
    /// immediately rather than waiting for the next heartbeat, satisfying
    /// the one-heartbeat visibility guarantee in spec §4.9.
    fn refresh_sessions(&self, remote_name: &str) -> BoxFuture<'_, Result<(), ErrorCode>>;

    /// Whether `session_id` belongs to a remote HQ knows about but that
    /// isn't running locally.
    fn owns_session(&self, session_id: &str) -> BoxFuture<'_, bool>;

    /// The last-known session list for every remote, so `GET /api/sessions`
    /// can merge local sessions with federated ones without a synchronous
    /// fan-out call per request. A remote that's currently unreachable still
    /// contributes its cached entries with `active: false` rather than
    /// being omitted (spec §4.9).
    fn list_sessions(&self) -> BoxFuture<'_, Vec<SessionView>>;

    /// Proxy a REST call for a session HQ doesn't run locally to its owning
    /// remote, forwarding method/path/headers/body verbatim and streaming
    /// the response back.
    fn proxy_request(
        &self,
        session_id: &str,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> BoxFuture<'_, Result<ProxiedResponse, ErrorCode>>;

    /// Open a bridging WebSocket to `ws_path` (e.g. `/ws/buffers` or
    /// `/ws/input/:id`) on the remote owning `session_id`, shuttling frames
    /// in both directions until either side closes. Returns the channel
    /// pair the API layer's WS handler drives.
    fn bridge_websocket(
        &self,
        session_id: &str,
        ws_path: &str,
    ) -> BoxFuture<
        '_,
        Result<
            (tokio::sync::mpsc::Sender<Vec<u8>>, tokio::sync::mpsc::Receiver<Vec<u8>>),
            ErrorCode,
        >,
    >;
}
