// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle / shutdown (spec §4.11, component C11).
//!
//! Signal handling lives in the `vibetunnel` binary (it owns the process);
//! this module holds the shared drain state the API layer (C8) and the HQ
//! federation client consult so they can reject new work and suppress noisy
//! best-effort calls once a shutdown is underway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::session::Manager;

/// Grace period for in-flight HTTP requests to complete after shutdown
/// begins (spec §4.11).
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared shutdown state. Cloning shares the same flag and token.
#[derive(Clone)]
pub struct Lifecycle {
    shutdown: CancellationToken,
    shutting_down: Arc<AtomicBool>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { shutdown: CancellationToken::new(), shutting_down: Arc::new(AtomicBool::new(false)) }
    }

    /// The token flush loops and the control-directory watcher select on.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// True once [`Lifecycle::begin_shutdown`] has run. The API layer uses
    /// this to start returning `ErrorCode::ServerShuttingDown` (503) to new
    /// mutating requests, and HQ uses it to suppress remote-notification
    /// attempts that would just fail noisily (spec §4.11).
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Flip into drain mode: new requests start getting rejected and every
    /// component selecting on the cancellation token wakes up.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.shutdown.cancel();
    }
}

/// Run the drain sequence described in spec §4.11: stop accepting new
/// connections (the caller arranges this via axum's graceful shutdown),
/// wait up to [`SHUTDOWN_GRACE`] for in-flight work to wind down, then flush
/// every session's recorder. No child process is killed — sessions continue
/// running on disk after this process exits.
pub async fn drain(lifecycle: &Lifecycle, manager: &Manager) {
    lifecycle.begin_shutdown();
    info!("shutting down: draining in-flight requests");
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    manager.flush_all().await;
    info!("shutting down: recorders flushed");
}
