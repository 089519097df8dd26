// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY supervisor (spec §4.3, component C3).

pub mod external;
pub mod nbio;
pub mod spawn;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Outcome of a child process exiting, or a synthesized failure (spec §4.3
/// failure model: spawn failure → code -1, mid-run read error → code -2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub const SPAWN_FAILED: ExitStatus = ExitStatus { code: Some(-1), signal: None };
    pub const READ_ERROR: ExitStatus = ExitStatus { code: Some(-2), signal: None };

    /// POSIX convention: 128 + signal number, or the exit code.
    pub fn as_posix_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(c), _) => c,
            (None, Some(s)) => 128 + s,
            (None, None) => -1,
        }
    }
}

/// A terminal backend driving one session's byte stream.
///
/// Two implementations: [`spawn::NativePty`] (owns a forked PTY child) and
/// [`external::TailBackend`], the control-directory watcher's tailing
/// backend for "external" sessions (spec §4.5) that never spawns a process
/// of its own.
pub trait Backend: Send + 'static {
    /// Run the backend until the child exits or the input channel closes.
    /// `output_tx` carries PTY bytes as they're read; `input_rx` carries
    /// bytes to write, in order.
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        input_rx: mpsc::Receiver<Bytes>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>;

    /// Apply a new terminal size (TIOCSWINSZ semantics for native PTYs; a
    /// no-op for external sessions, which aren't attached to the real tty).
    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()>;

    fn child_pid(&self) -> Option<u32>;

    /// A cheap, independently callable resize capability, captured before
    /// `run` takes ownership of the backend for the duration of the
    /// session. `run` holds `&mut self` (and therefore exclusive ownership,
    /// once moved into its spawned task) until the child exits, so the
    /// session manager cannot reach `resize` through the trait object while
    /// a session is live; this closure is extracted once at spawn time and
    /// kept alongside the session handle instead.
    fn resize_fn(&self) -> ResizeFn;
}

/// Independently callable resize capability, see [`Backend::resize_fn`].
pub type ResizeFn = Arc<dyn Fn(u16, u16) -> anyhow::Result<()> + Send + Sync>;
