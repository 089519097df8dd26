// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires the session engine, HQ federation, control-directory watcher, and
//! HTTP/WS router together, and runs them to shutdown (spec §6 `serve`).

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vibetunnel_core::api::{self, AppState, AuthPredicate};
use vibetunnel_core::fanout::Fanout;
use vibetunnel_core::lifecycle::{self, Lifecycle};
use vibetunnel_core::session::Manager;
use vibetunnel_core::watcher::Watcher;
use vibetunnel_hq::{RemoteAgent, Registry};

use crate::config::ServeArgs;

/// Initialize tracing from `VIBETUNNEL_LOG_LEVEL`/`--debug`, falling back to
/// `RUST_LOG` if the caller set neither (teacher's `init_tracing` priority,
/// generalised from a single log-level flag to vibetunnel's env var name).
pub fn init_tracing(args: &ServeArgs) {
    use tracing_subscriber::EnvFilter;

    let level = args.effective_log_level();
    let filter = if std::env::var("VIBETUNNEL_LOG_LEVEL").is_err() && !args.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn build_auth_predicate(args: &ServeArgs) -> Option<AuthPredicate> {
    if args.no_auth {
        return None;
    }
    let token = args.auth_token.clone()?;
    let expected = format!("Bearer {token}");
    Some(Arc::new(move |headers: &axum::http::HeaderMap| {
        headers.get(axum::http::header::AUTHORIZATION).map(|v| v.as_bytes()) == Some(expected.as_bytes())
    }))
}

/// Install the process-wide rustls crypto provider once, so an `https://`
/// `--hq` URL or remote registration doesn't panic on first handshake.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Run the server to completion, returning the process exit code.
pub async fn run(args: ServeArgs) -> anyhow::Result<i32> {
    install_crypto_provider();
    init_tracing(&args);
    args.validate()?;

    let control_dir = args.resolve_control_dir();
    std::fs::create_dir_all(&control_dir)?;

    let lifecycle = Lifecycle::new();
    let shutdown = lifecycle.token();
    let fanout = Arc::new(Fanout::new());
    let manager = Arc::new(Manager::new(control_dir.clone(), fanout, shutdown.clone()));

    // Every node can accept `POST /api/remotes` and act as an HQ for
    // whatever remotes register with it (spec §4.9: there is no separate
    // "hq mode" flag — HQ-ness just falls out of who calls this route).
    let registry = Registry::new(shutdown.clone());

    let watcher = Watcher::new(control_dir.clone());
    tokio::spawn(watcher.run(manager.clone(), shutdown.clone()));

    if let (Some(hq_url), Some(hq_token), Some(name)) =
        (args.hq.clone(), args.hq_token.clone(), args.name.clone())
    {
        let self_url = format!("http://{}:{}", args.bind, args.port);
        let agent = Arc::new(RemoteAgent::new(hq_url, hq_token, name, self_url));
        tokio::spawn(agent.run(manager.clone(), shutdown.clone()));
    }

    let auth = build_auth_predicate(&args);
    let state = Arc::new(AppState::new(manager.clone(), Some(registry), lifecycle.clone(), auth));
    let router = api::build_router(state);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {}", listener.local_addr()?);

    spawn_signal_handler(shutdown.clone());

    let serve_result =
        axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await;
    if let Err(err) = serve_result {
        error!("http server error: {err}");
    }

    lifecycle::drain(&lifecycle, &manager).await;
    Ok(0)
}

/// First SIGTERM/SIGINT cancels `shutdown` to start the graceful drain; a
/// second forces immediate exit (spec §4.11 drain sequence has no
/// second-signal override of its own, so this mirrors the teacher's
/// belt-and-suspenders operator override).
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
