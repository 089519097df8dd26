// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tailing backend for external sessions (spec §4.5): the PTY is driven by a
//! process outside the server, so there is no child to own, resize, or
//! write to. The only thing this backend does is poll the session's
//! `stdout` recording file for new bytes and forward them as if they had
//! come from a live PTY, so the rest of the pipeline (screen, fan-out,
//! activity detector) can't tell the difference.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Backend, ExitStatus, ResizeFn};
use crate::recording::replay_from;

/// How often to poll the recording file for new events.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Tails a session's `stdout` recording file rather than owning a PTY.
pub struct TailBackend {
    stdout_path: PathBuf,
    offset: u64,
}

impl TailBackend {
    /// `offset` is the byte offset to resume tailing from — 0 for a
    /// session attached at creation time, or a later offset if the watcher
    /// re-attached to an already-running external session.
    pub fn new(stdout_path: PathBuf, offset: u64) -> Self {
        Self { stdout_path, offset }
    }
}

impl Backend for TailBackend {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<Bytes>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>
    {
        Box::pin(async move {
            // External sessions have no writable side; inputs are drained
            // and discarded rather than routed anywhere, since the session
            // manager rejects input() for external sources before this
            // backend would ever see it. Draining keeps the channel from
            // backing up if that guard is ever bypassed.
            let mut poll = tokio::time::interval(POLL_INTERVAL);

            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        let batch = replay_from(&self.stdout_path, self.offset)?;
                        self.offset = batch.next_offset;

                        for event in &batch.events {
                            if let Some(status) = forward_event(event, &output_tx).await? {
                                return Ok(status);
                            }
                        }
                    }
                    input = input_rx.recv() => {
                        if input.is_none() {
                            // Caller closed the input side; keep tailing —
                            // the session only ends on an "e" event or
                            // removal of the control directory (handled by
                            // the watcher, which drops this backend).
                        }
                    }
                }
            }
        })
    }

    fn resize(&self, _cols: u16, _rows: u16) -> anyhow::Result<()> {
        Ok(())
    }

    fn child_pid(&self) -> Option<u32> {
        None
    }

    fn resize_fn(&self) -> ResizeFn {
        Arc::new(|_cols, _rows| Ok(()))
    }
}

/// Forward one parsed recording event to `output_tx`. Returns `Some(status)`
/// if the event was an `exit` marker, ending the tail.
async fn forward_event(
    event: &Value,
    output_tx: &mpsc::Sender<Bytes>,
) -> anyhow::Result<Option<ExitStatus>> {
    let Some(arr) = event.as_array() else { return Ok(None) };
    let Some(kind) = arr.first().and_then(Value::as_str) else { return Ok(None) };

    match kind {
        "o" => {
            if let Some(text) = arr.get(2).and_then(Value::as_str) {
                let _ = output_tx.send(Bytes::copy_from_slice(text.as_bytes())).await;
            }
            Ok(None)
        }
        "e" => {
            let code = arr.get(2).and_then(Value::as_i64).map(|c| c as i32);
            Ok(Some(ExitStatus { code, signal: None }))
        }
        _ => Ok(None),
    }
}
