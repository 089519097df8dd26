// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST handlers for session CRUD and recording replay (spec §6).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::federation::ProxiedResponse;
use crate::recording::{self, SessionStatus};
use crate::session::{CreateOptions, InputPayload, SpecialKey};

use super::AppState;

/// When a mutating request 404s locally and the server runs in HQ mode,
/// proxy it verbatim to the remote that owns the session (spec §4.9 S6:
/// mutating calls on an unreachable remote's session return 502).
async fn proxy_fallback(
    state: &AppState,
    id: &str,
    method: Method,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Option<Response> {
    let federation = state.federation.as_ref()?;
    if !federation.owns_session(id).await {
        return None;
    }
    Some(match federation.proxy_request(id, method, path, headers, body).await {
        Ok(resp) => proxied_into_response(resp),
        Err(code) => code.to_http_response("failed to proxy to remote"),
    })
}

fn proxied_into_response(resp: ProxiedResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, resp.body).into_response();
    *response.headers_mut() = resp.headers;
    response
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
    /// Accepted and echoed nowhere else — titleMode belongs to the web UI
    /// collaborator (spec §9 open question); we just capture it.
    #[serde(default)]
    pub title_mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

pub async fn list(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut views = state.manager.list().await;
    if let Some(federation) = state.federation.as_ref() {
        views.extend(federation.list_sessions().await);
    }
    Json(views)
}

pub async fn create(State(state): State<Arc<AppState>>, Json(body): Json<CreateSessionBody>) -> Response {
    if body.command.is_empty() {
        return ErrorCode::BadRequest.to_http_response("command must not be empty");
    }
    if let Some(ref cwd) = body.working_dir {
        if !cwd.is_dir() {
            return ErrorCode::BadRequest.to_http_response("workingDir does not exist");
        }
    }
    let opts = CreateOptions {
        command: body.command,
        cwd: body.working_dir,
        name: body.name,
        cols: body.cols.unwrap_or(80),
        rows: body.rows.unwrap_or(24),
        extra_env: Vec::new(),
        record_input: true,
    };
    match state.manager.create(opts).await {
        Ok(session_id) => (StatusCode::CREATED, Json(CreateSessionResponse { session_id })).into_response(),
        Err(err) => ErrorCode::Internal.to_http_response(err.to_string()),
    }
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.manager.get(&id).await {
        Ok(view) => Json(view).into_response(),
        Err(ErrorCode::NotFound) => match federated_view(&state, &id).await {
            Some(view) => Json(view).into_response(),
            None => ErrorCode::NotFound.to_http_response("unknown session"),
        },
        Err(code) => code.to_http_response("failed to look up session"),
    }
}

async fn federated_view(
    state: &AppState,
    id: &str,
) -> Option<crate::session::SessionView> {
    let federation = state.federation.as_ref()?;
    federation.list_sessions().await.into_iter().find(|v| v.id == id)
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.manager.remove(&id, false).await {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(ErrorCode::NotFound) => {
            let path = format!("/api/sessions/{id}");
            match proxy_fallback(&state, &id, Method::DELETE, &path, headers, Bytes::new()).await {
                Some(response) => response,
                None => ErrorCode::NotFound.to_http_response("unknown session"),
            }
        }
        Err(code) => code.to_http_response("failed to remove session"),
    }
}

#[derive(Debug, Deserialize)]
pub struct InputBody {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub key: Option<SpecialKey>,
}

pub async fn input(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed: Result<InputBody, _> = serde_json::from_slice(&body);
    let payload = match parsed {
        Ok(InputBody { text: Some(text), .. }) => InputPayload::Text(text),
        Ok(InputBody { text: None, key: Some(key) }) => InputPayload::Key(key),
        Ok(InputBody { text: None, key: None }) => {
            return ErrorCode::BadRequest.to_http_response("text or key required")
        }
        Err(err) => return ErrorCode::BadRequest.to_http_response(err.to_string()),
    };
    match state.manager.input(&id, payload).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(ErrorCode::NotFound) => {
            let path = format!("/api/sessions/{id}/input");
            match proxy_fallback(&state, &id, Method::POST, &path, headers, body).await {
                Some(response) => response,
                None => ErrorCode::NotFound.to_http_response("unknown session"),
            }
        }
        Err(code) => code.to_http_response("failed to send input"),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResizeBody {
    pub cols: u16,
    pub rows: u16,
}

pub async fn resize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed: Result<ResizeBody, _> = serde_json::from_slice(&body);
    let resize_body = match parsed {
        Ok(resize_body) => resize_body,
        Err(err) => return ErrorCode::BadRequest.to_http_response(err.to_string()),
    };
    match state.manager.resize(&id, resize_body.cols, resize_body.rows).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(ErrorCode::NotFound) => {
            let path = format!("/api/sessions/{id}/resize");
            match proxy_fallback(&state, &id, Method::POST, &path, headers, body).await {
                Some(response) => response,
                None => ErrorCode::NotFound.to_http_response("unknown session"),
            }
        }
        Err(code) => code.to_http_response("failed to resize"),
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub from: u64,
}

/// Poll interval for the SSE replay stream once it has caught up to the end
/// of the file, waiting for more events or session exit.
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct StreamState {
    path: PathBuf,
    offset: u64,
    done: bool,
}

/// `GET /api/sessions/:id/stream?from=<bytes>`: replay recording events as
/// server-sent events, starting at a byte offset and following the session
/// until it exits (spec §6).
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let Ok(view) = state.manager.get(&id).await else {
        return ErrorCode::NotFound.to_http_response("unknown session");
    };
    let path = state.manager.control_root().join(&id).join("stdout");
    let initial_status = view.status;
    let manager = state.manager.clone();
    let seed = StreamState { path, offset: query.from, done: false };

    let events = stream::unfold((seed, manager, id, initial_status), |(mut st, manager, id, mut last_status)| async move {
        loop {
            if st.done {
                return None;
            }
            let replayed = tokio::task::spawn_blocking({
                let path = st.path.clone();
                let from = st.offset;
                move || recording::replay_from(&path, from)
            })
            .await;
            let replayed = match replayed {
                Ok(Ok(events)) => events,
                _ => {
                    st.done = true;
                    return None;
                }
            };
            st.offset = replayed.next_offset;
            if let Ok(view) = manager.get(&id).await {
                last_status = view.status;
            }
            if replayed.events.is_empty() {
                if last_status == SessionStatus::Exited {
                    st.done = true;
                    return None;
                }
                tokio::time::sleep(STREAM_POLL_INTERVAL).await;
                continue;
            }
            let batch: Vec<Event> = replayed
                .events
                .iter()
                .filter_map(|value| Event::default().json_data(value).ok())
                .collect();
            return Some((batch, (st, manager, id, last_status)));
        }
    })
    .flat_map(stream::iter)
    .map(Ok::<_, std::convert::Infallible>);

    let boxed: std::pin::Pin<Box<dyn Stream<Item = Result<Event, std::convert::Infallible>> + Send>> =
        Box::pin(events);
    Sse::new(boxed).keep_alive(KeepAlive::default()).into_response()
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
