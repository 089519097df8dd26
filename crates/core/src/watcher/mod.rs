// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-directory watcher (spec §4.5, component C5).
//!
//! Watches `<control-root>` for session directories appearing and
//! disappearing. A new directory is polled for a readable `session.json`
//! with exponential backoff; once readable, the session is registered with
//! the [`crate::session::Manager`] as "external" — no owned PTY, driven by
//! tailing its `stdout` file. Removing a directory transitions that session
//! to exited. The filesystem is the IPC: nothing here calls back into an
//! in-process API.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::recording::read_session_json;
use crate::session::Manager;

/// Backoff schedule for polling a new directory for a readable
/// `session.json` (spec §4.5: 100, 200, 400, 800, 1600 ms, 5 attempts).
const BACKOFF: [Duration; 5] = [
    Duration::from_millis(100),
    Duration::from_millis(200),
    Duration::from_millis(400),
    Duration::from_millis(800),
    Duration::from_millis(1600),
];

/// Fallback poll interval for directory listing, in case a `notify` event
/// is missed (rename-based editors, network filesystems, etc.).
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Watches `control_root` for session directories coming and going, driving
/// `manager`'s `attach_external`/`mark_external_gone`.
pub struct Watcher {
    control_root: PathBuf,
}

impl Watcher {
    pub fn new(control_root: PathBuf) -> Self {
        Self { control_root }
    }

    /// Run until `shutdown` fires. Spawns one short-lived task per new
    /// directory to run its backoff-poll for `session.json`, so a slow
    /// writer in one session doesn't delay noticing others.
    pub async fn run(self, manager: std::sync::Arc<Manager>, shutdown: CancellationToken) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _fs_watcher = setup_notify_watcher(&self.control_root, wake_tx);

        let mut known: HashSet<String> = list_entries(&self.control_root).into_iter().collect();
        let mut poll = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = poll.tick() => {}
            }

            let current: HashSet<String> = list_entries(&self.control_root).into_iter().collect();

            for id in current.difference(&known) {
                if manager.is_local(id) {
                    // Our own `create()` wrote this directory; nothing to attach.
                    continue;
                }
                debug!(session_id = %id, "watcher: new control directory");
                let dir = self.control_root.join(id);
                let mgr = manager.clone();
                let id = id.clone();
                tokio::spawn(async move { register_when_ready(mgr, id, dir).await });
            }

            for id in known.difference(&current) {
                debug!(session_id = %id, "watcher: control directory removed");
                manager.mark_external_gone(id).await;
            }

            known = current;
        }
    }
}

/// Poll a freshly-seen directory for a readable `session.json` on
/// [`BACKOFF`], then register it as external. Gives up silently after the
/// schedule is exhausted — the directory may belong to something else
/// entirely, or its writer may have died before finishing.
async fn register_when_ready(manager: std::sync::Arc<Manager>, id: String, dir: PathBuf) {
    for delay in BACKOFF {
        if manager.is_local(&id) {
            // A local `create()` raced us between the listing snapshot and
            // this task starting; it owns the directory, not us.
            return;
        }
        if let Ok(meta) = read_session_json(&dir) {
            if manager.is_local(&id) {
                return;
            }
            if let Err(e) = manager.attach_external(id.clone(), meta).await {
                warn!(session_id = %id, error = %e, "failed to attach external session");
            }
            return;
        }
        tokio::time::sleep(delay).await;
    }
    warn!(session_id = %id, "gave up waiting for session.json to become readable");
}

fn list_entries(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else { return Vec::new() };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect()
}

fn setup_notify_watcher(root: &Path, wake_tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        let _ = wake_tx.try_send(());
    })
    .ok()?;
    watcher.watch(root, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
