// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session select loop: the single place PTY output is fed into the
//! recorder, the emulator, and the fan-out, keeping all three in the same
//! order the bytes were read from the PTY (spec §5 ordering guarantees).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::codec;
use crate::fanout;
use crate::pty::ExitStatus;
use crate::recording::SessionStatus;

use super::manager::SessionHandle;

/// Output events arriving within this window are coalesced into one
/// published snapshot (spec §4.7).
const COALESCE_WINDOW: Duration = Duration::from_millis(16);

/// Spawn the task that drives one session's output → {recorder, screen,
/// fan-out} pipeline until the backend exits.
pub(super) fn spawn(
    handle: Arc<SessionHandle>,
    mut output_rx: mpsc::Receiver<Bytes>,
    backend_handle: JoinHandle<anyhow::Result<ExitStatus>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut coalesce = tokio::time::interval(COALESCE_WINDOW);
        tokio::pin!(backend_handle);

        let exit_status = loop {
            tokio::select! {
                data = output_rx.recv() => {
                    match data {
                        Some(bytes) => feed(&handle, &bytes).await,
                        None => {}
                    }
                }
                _ = coalesce.tick() => {
                    publish_if_changed(&handle).await;
                }
                result = &mut backend_handle => {
                    break match result {
                        Ok(Ok(status)) => status,
                        Ok(Err(e)) => {
                            warn!(session_id = %handle.id, error = %e, "backend returned an error");
                            ExitStatus::READ_ERROR
                        }
                        Err(e) => {
                            warn!(session_id = %handle.id, error = %e, "backend task panicked");
                            ExitStatus::READ_ERROR
                        }
                    };
                }
            }
        };

        // Flush any output that arrived in the same instant the backend
        // exited, so the recording and final snapshot both include it.
        while let Ok(bytes) = output_rx.try_recv() {
            feed(&handle, &bytes).await;
        }
        publish_if_changed(&handle).await;

        let code = exit_status.as_posix_code();
        if !handle.is_external() {
            handle.recorder.append_exit(code);
            handle.recorder.flush();
        }
        handle.set_exit_code(Some(code));
        handle.set_status(SessionStatus::Exited);
        handle.persist();
    })
}

/// Feed one tailed/read chunk into the recorder, activity detector, and
/// emulator, in that order (spec §5 ordering guarantees). External sessions
/// (spec §4.5) skip the recorder: the bytes were already tailed from that
/// same `stdout`, so re-appending them would both duplicate the producer's
/// recording and hand `TailBackend` its own output back as new input.
async fn feed(handle: &Arc<SessionHandle>, bytes: &Bytes) {
    if !handle.is_external() {
        handle.recorder.append_output(bytes);
    }
    handle.activity.note_output();
    let mut screen = handle.screen.lock().await;
    screen.feed(bytes);
}

async fn publish_if_changed(handle: &Arc<SessionHandle>) {
    let mut screen = handle.screen.lock().await;
    if !screen.changed() {
        return;
    }
    screen.clear_changed();
    if handle.fanout.subscriber_count(&handle.id) == 0 {
        // Still updated above; just skip the encode/publish cost (spec §4.7:
        // a session with zero subscribers incurs no encoding cost).
        return;
    }
    let frame = screen.to_frame();
    drop(screen);
    let payload = codec::encode(&frame);
    let framed = fanout::frame_message(&handle.id, &payload);
    handle.fanout.publish(&handle.id, framed);
}
