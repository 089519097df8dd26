// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for talking to a single remote node (spec §4.9).

use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use reqwest::Client;
use vibetunnel_core::error::ErrorCode;
use vibetunnel_core::session::SessionView;

/// Timeout for the periodic `/api/health` heartbeat (spec §6).
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP client wrapper for one remote `vibetunnel` instance.
pub struct RemoteClient {
    base_url: String,
    token: String,
    http: Client,
}

impl RemoteClient {
    pub fn new(base_url: String, token: String) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), token, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /api/health` with a tight timeout, used by the health checker.
    pub async fn health(&self) -> anyhow::Result<()> {
        self.http
            .get(self.url("/api/health"))
            .timeout(HEALTH_TIMEOUT)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// `GET /api/sessions`, used to populate HQ's session cache for a remote.
    pub async fn list_sessions(&self) -> anyhow::Result<Vec<SessionView>> {
        let resp = self
            .http
            .get(self.url("/api/sessions"))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Proxy an arbitrary REST call through verbatim, per spec §4.9: method,
    /// path, headers (auth rewritten to this remote's token), and body
    /// forwarded as-is; response streamed back.
    pub async fn proxy(
        &self,
        method: Method,
        path: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<(StatusCode, HeaderMap, Bytes), ErrorCode> {
        headers.remove("host");
        headers.remove("authorization");
        headers.remove("content-length");

        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|_| ErrorCode::BadRequest)?;
        let mut req = self.http.request(method, self.url(path)).bearer_auth(&self.token).body(body);
        for (name, value) in headers.iter() {
            req = req.header(name.as_str(), value.as_bytes());
        }

        let resp = req.send().await.map_err(|_| ErrorCode::UpstreamUnreachable)?;
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut out_headers = HeaderMap::new();
        for (name, value) in resp.headers().iter() {
            if let (Ok(name), Ok(value)) = (
                axum::http::HeaderName::from_bytes(name.as_str().as_bytes()),
                axum::http::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                out_headers.insert(name, value);
            }
        }
        let body = resp.bytes().await.map_err(|_| ErrorCode::UpstreamUnreachable)?;
        Ok((status, out_headers, body))
    }

    /// The `ws://`/`wss://` URL for bridging a websocket route on this remote.
    pub fn ws_url(&self, path: &str) -> String {
        let base = self.base_url.replacen("http", "ws", 1);
        format!("{base}{path}")
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}
