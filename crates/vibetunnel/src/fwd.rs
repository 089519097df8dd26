// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `vibetunnel fwd`: spawns a command on a native PTY and writes its
//! recording straight into a control directory, so a running `serve`
//! instance's watcher (C5) picks it up as an external session without
//! any in-process API call — the filesystem is the IPC (spec §4.5).

use std::sync::Arc;
use std::time::SystemTime;

use vibetunnel_core::pty::spawn::NativePty;
use vibetunnel_core::pty::Backend;
use vibetunnel_core::recording::{self, Recorder, SessionMetadata, SessionStatus};

use crate::config::FwdArgs;

/// Recording ring cache size for the forwarded session; matches the
/// session manager's default (spec §4.1).
const RING_CAPACITY: usize = 1 << 20;

/// Run the forwarded command to completion, returning the process exit code.
pub async fn run(args: FwdArgs) -> anyhow::Result<i32> {
    let control_dir = args.resolve_control_dir();
    let dir = control_dir.join(&args.session_id);
    std::fs::create_dir_all(&dir)?;

    let created_at =
        SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs();
    let mut meta = SessionMetadata {
        id: args.session_id.clone(),
        name: None,
        command: args.command.clone(),
        cwd: std::env::current_dir().ok(),
        cols: args.cols,
        rows: args.rows,
        status: SessionStatus::Starting,
        created_at,
        pid: None,
        exit_code: None,
    };
    recording::write_session_json_atomic(&dir, &meta)?;

    let recorder = Arc::new(Recorder::create(&dir, args.cols, args.rows, false, RING_CAPACITY)?);
    let mut backend =
        NativePty::spawn(&args.command, meta.cwd.as_deref(), &[], &args.session_id, args.cols, args.rows)?;
    meta.pid = backend.child_pid();
    meta.status = SessionStatus::Running;
    recording::write_session_json_atomic(&dir, &meta)?;

    let (output_tx, mut output_rx) = tokio::sync::mpsc::channel(256);
    let (_input_tx, input_rx) = tokio::sync::mpsc::channel(1);

    let drain_recorder = recorder.clone();
    let drain = async move {
        while let Some(chunk) = output_rx.recv().await {
            drain_recorder.append_output(&chunk);
        }
    };

    let (exit, ()) = tokio::join!(backend.run(output_tx, input_rx), drain);
    let exit = exit?;
    recorder.append_exit(exit.code.unwrap_or(-1));
    recorder.flush();

    meta.status = SessionStatus::Exited;
    meta.exit_code = exit.code;
    recording::write_session_json_atomic(&dir, &meta)?;

    Ok(exit.as_posix_code())
}
