// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP/WS API surface (spec §4.8/§6, component C8).
//!
//! Thin by design: handlers validate inputs, resolve auth, and delegate to
//! the session manager (C4), the fan-out (C7), and — for sessions this
//! process doesn't run locally — the federation plug-in (C9). Federation is
//! `None` in standalone mode, matching spec §4.9's three boot modes.

mod sessions;
mod ws;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::error::ErrorCode;
use crate::federation::Federation;
use crate::lifecycle::Lifecycle;
use crate::session::Manager;

/// Predicate deciding whether a request is authenticated. Absent entirely
/// when the server runs with `--no-auth`; the contract with whatever
/// verifies the credential is left to the caller (spec §9 open question).
pub type AuthPredicate = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;

/// Everything the API layer needs, shared across every handler.
pub struct AppState {
    pub manager: Arc<Manager>,
    pub federation: Option<Arc<dyn Federation>>,
    pub lifecycle: Lifecycle,
    pub auth: Option<AuthPredicate>,
    /// Opaque key/value store backing `GET`/`PUT /api/config` — the schema
    /// of its contents belongs to the external collaborator (spec §1, §6).
    config_store: Mutex<HashMap<String, serde_json::Value>>,
    pub version: &'static str,
}

impl AppState {
    pub fn new(
        manager: Arc<Manager>,
        federation: Option<Arc<dyn Federation>>,
        lifecycle: Lifecycle,
        auth: Option<AuthPredicate>,
    ) -> Self {
        Self {
            manager,
            federation,
            lifecycle,
            auth,
            config_store: Mutex::new(HashMap::new()),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        match &self.auth {
            Some(predicate) => predicate(headers),
            None => true,
        }
    }
}

/// Build the full axum `Router`: REST session CRUD/replay, HQ remote
/// registration, opaque config, and the two WebSocket endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(sessions::list).post(sessions::create))
        .route("/api/sessions/{id}", get(sessions::get).delete(sessions::delete))
        .route("/api/sessions/{id}/input", post(sessions::input))
        .route("/api/sessions/{id}/resize", post(sessions::resize))
        .route("/api/sessions/{id}/stream", get(sessions::stream))
        .route("/api/remotes", post(remotes_register))
        .route("/api/remotes/{name}/refresh-sessions", post(remotes_refresh))
        .route("/api/config", get(config_get).put(config_put))
        .route("/ws/input/{id}", get(ws::input_handler))
        .route("/ws/buffers", get(ws::buffers_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_and_drain_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Reject unauthenticated requests (except `/api/health`, which callers use
/// to probe liveness before they have a credential), and reject mutating
/// requests once the server has begun draining (spec §4.11, §7).
async fn auth_and_drain_layer(
    State(state): State<Arc<AppState>>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();
    if path != "/api/health" && !state.authorized(req.headers()) {
        return ErrorCode::Unauthorized.to_http_response("missing or invalid credentials");
    }
    if state.lifecycle.is_shutting_down() && req.method() != axum::http::Method::GET {
        return ErrorCode::ServerShuttingDown.to_http_response("server is draining");
    }
    next.run(req).await
}

#[derive(Serialize)]
struct HealthBody {
    ok: bool,
    version: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthBody { ok: true, version: state.version })
}

async fn remotes_register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRemoteBody>,
) -> Response {
    let Some(federation) = state.federation.as_ref() else {
        return ErrorCode::BadRequest.to_http_response("server is not running in hq mode");
    };
    match federation.register_remote(body.name, body.url, body.token).await {
        Ok(()) => (StatusCode::CREATED, Json(serde_json::json!({"ok": true}))).into_response(),
        Err(code) => code.to_http_response("failed to register remote"),
    }
}

#[derive(serde::Deserialize)]
struct RegisterRemoteBody {
    name: String,
    url: String,
    token: String,
}

async fn remotes_refresh(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(name): axum::extract::Path<String>,
) -> Response {
    let Some(federation) = state.federation.as_ref() else {
        return ErrorCode::BadRequest.to_http_response("server is not running in hq mode");
    };
    match federation.refresh_sessions(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => code.to_http_response("failed to refresh remote"),
    }
}

async fn config_get(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.config_store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    Json(serde_json::Value::Object(store.clone().into_iter().collect()))
}

async fn config_put(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Some(obj) = body.as_object() else {
        return ErrorCode::BadRequest.to_http_response("config body must be a JSON object");
    };
    let mut store = state.config_store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    for (k, v) in obj {
        store.insert(k.clone(), v.clone());
    }
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
