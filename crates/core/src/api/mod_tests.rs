use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};

use crate::fanout::Fanout;
use crate::session::Manager;

use super::{build_router, AppState};

#[allow(clippy::expect_used)]
fn test_app(auth: Option<super::AuthPredicate>) -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let fanout = Arc::new(Fanout::new());
    let manager = Arc::new(Manager::new(
        dir.path().to_path_buf(),
        fanout,
        tokio_util::sync::CancellationToken::new(),
    ));
    let state = Arc::new(AppState::new(manager, None, crate::lifecycle::Lifecycle::new(), auth));
    (state, dir)
}

#[tokio::test]
async fn health_reports_ok_without_auth() -> anyhow::Result<()> {
    let (state, _dir) = test_app(Some(Arc::new(|_: &HeaderMap| false)));
    let server = axum_test::TestServer::new(build_router(state))?;

    let resp = server.get("/api/health").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["ok"], serde_json::Value::Bool(true));
    Ok(())
}

#[tokio::test]
async fn unauthenticated_request_is_rejected() -> anyhow::Result<()> {
    let (state, _dir) = test_app(Some(Arc::new(|_: &HeaderMap| false)));
    let server = axum_test::TestServer::new(build_router(state))?;

    let resp = server.get("/api/sessions").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn authenticated_request_passes() -> anyhow::Result<()> {
    let (state, _dir) = test_app(Some(Arc::new(|headers: &HeaderMap| {
        headers.get("authorization") == Some(&HeaderValue::from_static("Bearer good"))
    })));
    let server = axum_test::TestServer::new(build_router(state))?;

    let resp = server.get("/api/sessions").add_header("authorization", "Bearer good").await;
    resp.assert_status(StatusCode::OK);
    Ok(())
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn draining_rejects_mutating_requests_but_allows_reads() -> anyhow::Result<()> {
    let (state, _dir) = test_app(None);
    state.lifecycle.begin_shutdown();
    let server = axum_test::TestServer::new(build_router(state))?;

    let get_resp = server.get("/api/sessions").await;
    get_resp.assert_status(StatusCode::OK);

    let post_resp = server
        .post("/api/sessions")
        .json(&serde_json::json!({"command": ["true"]}))
        .await;
    post_resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(post_resp.headers().get("Retry-After").unwrap(), "5");
    Ok(())
}

#[tokio::test]
async fn config_round_trips() -> anyhow::Result<()> {
    let (state, _dir) = test_app(None);
    let server = axum_test::TestServer::new(build_router(state))?;

    let put_resp = server.put("/api/config").json(&serde_json::json!({"theme": "dark"})).await;
    put_resp.assert_status(StatusCode::NO_CONTENT);

    let get_resp = server.get("/api/config").await;
    get_resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = get_resp.json();
    assert_eq!(body["theme"], "dark");
    Ok(())
}

#[tokio::test]
async fn remotes_require_hq_mode() -> anyhow::Result<()> {
    let (state, _dir) = test_app(None);
    let server = axum_test::TestServer::new(build_router(state))?;

    let resp = server
        .post("/api/remotes")
        .json(&serde_json::json!({"name": "r1", "url": "http://x", "token": "t"}))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}
