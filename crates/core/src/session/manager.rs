// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager (spec §4.4, component C4): creates/lists/terminates
//! sessions and owns the PTY supervisor, emulator, and recorder for each.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::Detector as ActivityDetector;
use crate::error::ErrorCode;
use crate::fanout::Fanout;
use crate::pty::external::TailBackend;
use crate::pty::spawn::NativePty;
use crate::pty::{Backend, ExitStatus, ResizeFn};
use crate::recording::{self, Recorder, SessionMetadata, SessionStatus};
use crate::screen::Screen;

use super::input_queue::InputQueue;
use super::keys::SpecialKey;
use super::loop_task;

/// Spawn the backend's `run` loop on its own task, plus a feeder task
/// draining an [`InputQueue`] into its input channel, and return the queue,
/// the output receiver for the session loop task, and a join handle
/// resolving to the backend's exit status.
///
/// The queue is what makes [`Manager::input`] non-blocking: it absorbs
/// bursts with drop-oldest semantics, while the feeder's send to the
/// backend's own bounded channel is where a slow PTY's backpressure is
/// actually felt (spec §4.3).
fn spawn_backend(
    mut backend: impl Backend,
) -> (Arc<InputQueue>, mpsc::Receiver<Bytes>, JoinHandle<anyhow::Result<ExitStatus>>) {
    let (output_tx, output_rx) = mpsc::channel(256);
    let (backend_input_tx, input_rx) = mpsc::channel(256);
    let inner_handle = tokio::spawn(async move { backend.run(output_tx, input_rx).await });

    // The feeder would otherwise pop() forever once a session exits and
    // nothing pushes to its queue again; `exited_rx` gives it a way out.
    let (exited_tx, mut exited_rx) = tokio::sync::oneshot::channel::<()>();
    let queue = Arc::new(InputQueue::new());
    let feeder = queue.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut exited_rx => break,
                chunk = feeder.pop() => {
                    if backend_input_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let backend_handle = tokio::spawn(async move {
        let result = inner_handle.await;
        let _ = exited_tx.send(());
        match result {
            Ok(r) => r,
            Err(join_err) => Err(anyhow::anyhow!("backend task panicked: {join_err}")),
        }
    });

    (queue, output_rx, backend_handle)
}

/// How long a freshly-created session stays `starting` before the manager
/// flips it to `running` even absent any PTY output yet (spec §4.4).
const STARTUP_GRACE: Duration = Duration::from_millis(250);

/// Delay between `kill`'s initial signal and the forced `SIGKILL` escalation.
const KILL_ESCALATION: Duration = Duration::from_secs(3);

/// Where a session's bytes originate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionSource {
    Local,
    External,
    Remote { node: String },
}

/// Input payload accepted by [`Manager::input`].
#[derive(Debug, Clone)]
pub enum InputPayload {
    Text(String),
    Key(SpecialKey),
}

/// Options accepted by [`Manager::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub extra_env: Vec<(String, String)>,
    pub record_input: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            cwd: None,
            name: None,
            cols: 80,
            rows: 24,
            extra_env: Vec::new(),
            record_input: false,
        }
    }
}

/// Externally-visible view of a session, returned by `list`/`get` (spec §3/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub name: Option<String>,
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    pub status: SessionStatus,
    pub created_at: u64,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub active: bool,
    pub source: SessionSource,
    pub last_clear_offset: u64,
    pub is_active: bool,
}

struct SessionMeta {
    name: Option<String>,
    command: Vec<String>,
    cwd: Option<PathBuf>,
    cols: u16,
    rows: u16,
    created_at: u64,
    pid: Option<u32>,
    exit_code: Option<i32>,
}

/// Everything the manager and the session loop task share for one session.
pub(super) struct SessionHandle {
    pub(super) id: String,
    pub(super) dir: PathBuf,
    pub(super) recorder: Arc<Recorder>,
    pub(super) screen: Arc<AsyncMutex<Screen>>,
    pub(super) resize_fn: ResizeFn,
    pub(super) input_queue: Arc<InputQueue>,
    pub(super) activity: Arc<ActivityDetector>,
    pub(super) fanout: Arc<Fanout>,
    pub(super) cancel: CancellationToken,
    status: StdMutex<SessionStatus>,
    meta: StdMutex<SessionMeta>,
    source: SessionSource,
    child_pid: Option<u32>,
}

impl SessionHandle {
    pub(super) fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(super) fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = status;
    }

    pub(super) fn set_exit_code(&self, code: Option<i32>) {
        self.meta.lock().unwrap_or_else(std::sync::PoisonError::into_inner).exit_code = code;
    }

    /// Whether this session tails an out-of-process producer's recording
    /// rather than owning a PTY of its own (spec §4.5) — it must never write
    /// back into the `stdout` file it's reading from.
    pub(super) fn is_external(&self) -> bool {
        matches!(self.source, SessionSource::External)
    }

    pub(super) fn persist(&self) {
        let meta = self.meta.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = SessionMetadata {
            id: self.id.clone(),
            name: meta.name.clone(),
            command: meta.command.clone(),
            cwd: meta.cwd.clone(),
            cols: meta.cols,
            rows: meta.rows,
            status: self.status(),
            created_at: meta.created_at,
            pid: meta.pid,
            exit_code: meta.exit_code,
        };
        drop(meta);
        if let Err(e) = recording::write_session_json_atomic(&self.dir, &record) {
            warn!(session_id = %self.id, error = %e, "failed to persist session.json");
        }
    }

    fn view(&self, is_active: bool) -> SessionView {
        let meta = self.meta.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        SessionView {
            id: self.id.clone(),
            name: meta.name.clone(),
            command: meta.command.clone(),
            cwd: meta.cwd.clone(),
            cols: meta.cols,
            rows: meta.rows,
            status: self.status(),
            created_at: meta.created_at,
            pid: meta.pid,
            exit_code: meta.exit_code,
            active: !matches!(self.status(), SessionStatus::Exited),
            source: self.source.clone(),
            last_clear_offset: self.recorder.last_clear_offset(),
            is_active,
        }
    }
}

fn now_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Owns every live session and exposes the operations in spec §4.4.
pub struct Manager {
    control_root: PathBuf,
    sessions: AsyncMutex<HashMap<String, Arc<SessionHandle>>>,
    fanout: Arc<Fanout>,
    shutdown: CancellationToken,
    ring_capacity: usize,
    /// Fires whenever a local session is created, attached, or removed, so a
    /// remote-mode client can notify HQ without waiting for the next
    /// heartbeat (spec §4.9 ordering guarantee).
    change_notify: Arc<tokio::sync::Notify>,
    /// Ids reserved by [`Manager::create`] before its control directory
    /// exists, so the control-directory watcher (C5) never races a local
    /// `create()` and mistakes the session's own directory for an external
    /// one — it checks this set and skips attaching anything already here.
    /// Ids are never removed: control directories don't get reused.
    local_ids: StdMutex<HashSet<String>>,
}

impl Manager {
    pub fn new(control_root: PathBuf, fanout: Arc<Fanout>, shutdown: CancellationToken) -> Self {
        Self {
            control_root,
            sessions: AsyncMutex::new(HashMap::new()),
            fanout,
            shutdown,
            ring_capacity: 1 << 20,
            change_notify: Arc::new(tokio::sync::Notify::new()),
            local_ids: StdMutex::new(HashSet::new()),
        }
    }

    /// Whether `id` is (or is about to become) a locally-owned session, per
    /// [`Manager::create`]. Used by the control-directory watcher to avoid
    /// attaching a local session's own directory as an external one.
    pub fn is_local(&self, id: &str) -> bool {
        self.local_ids.lock().unwrap_or_else(std::sync::PoisonError::into_inner).contains(id)
    }

    pub fn control_root(&self) -> &std::path::Path {
        &self.control_root
    }

    pub fn fanout(&self) -> &Arc<Fanout> {
        &self.fanout
    }

    /// Subscribe to local session create/remove notifications (spec §4.9).
    pub fn change_notify(&self) -> Arc<tokio::sync::Notify> {
        self.change_notify.clone()
    }

    /// Spawn a new local session (spec §4.4 `create`).
    pub async fn create(&self, opts: CreateOptions) -> anyhow::Result<String> {
        if opts.command.is_empty() {
            anyhow::bail!("command must have at least one argument");
        }
        let id = Uuid::new_v4().to_string();
        self.local_ids.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id.clone());
        let dir = self.control_root.join(&id);
        let created_at = now_unix_secs();

        let initial = SessionMetadata {
            id: id.clone(),
            name: opts.name.clone(),
            command: opts.command.clone(),
            cwd: opts.cwd.clone(),
            cols: opts.cols,
            rows: opts.rows,
            status: SessionStatus::Starting,
            created_at,
            pid: None,
            exit_code: None,
        };
        std::fs::create_dir_all(&dir)?;
        recording::write_session_json_atomic(&dir, &initial)?;

        let recorder =
            Arc::new(Recorder::create(&dir, opts.cols, opts.rows, opts.record_input, self.ring_capacity)?);
        recording::spawn_flush_loop(recorder.clone(), self.shutdown.clone());

        let backend =
            NativePty::spawn(&opts.command, opts.cwd.as_deref(), &opts.extra_env, &id, opts.cols, opts.rows)?;
        let child_pid = backend.child_pid();
        let resize_fn = backend.resize_fn();
        let (input_queue, output_rx, backend_handle) = spawn_backend(backend);

        let handle = Arc::new(SessionHandle {
            id: id.clone(),
            dir: dir.clone(),
            recorder,
            screen: Arc::new(AsyncMutex::new(Screen::new(opts.cols, opts.rows))),
            resize_fn,
            input_queue,
            activity: Arc::new(ActivityDetector::new()),
            fanout: self.fanout.clone(),
            cancel: CancellationToken::new(),
            status: StdMutex::new(SessionStatus::Starting),
            meta: StdMutex::new(SessionMeta {
                name: opts.name,
                command: opts.command,
                cwd: opts.cwd,
                cols: opts.cols,
                rows: opts.rows,
                created_at,
                pid: child_pid,
                exit_code: None,
            }),
            source: SessionSource::Local,
            child_pid,
        });

        loop_task::spawn(handle.clone(), output_rx, backend_handle);
        self.insert(handle).await;
        self.change_notify.notify_waiters();
        Ok(id)
    }

    /// Register an "external" session discovered by the control-directory
    /// watcher (spec §4.5): no owned PTY, tails `stdout` instead.
    pub async fn attach_external(&self, id: String, meta: SessionMetadata) -> anyhow::Result<()> {
        let dir = self.control_root.join(&id);
        let recorder = Arc::new(Recorder::open_external(&dir, self.ring_capacity)?);

        let backend = TailBackend::new(dir.join("stdout"), 0);
        let resize_fn = backend.resize_fn();
        let (input_queue, output_rx, backend_handle) = spawn_backend(backend);

        let handle = Arc::new(SessionHandle {
            id: id.clone(),
            dir,
            recorder,
            screen: Arc::new(AsyncMutex::new(Screen::new(meta.cols, meta.rows))),
            resize_fn,
            input_queue,
            activity: Arc::new(ActivityDetector::new()),
            fanout: self.fanout.clone(),
            cancel: CancellationToken::new(),
            status: StdMutex::new(meta.status),
            meta: StdMutex::new(SessionMeta {
                name: meta.name,
                command: meta.command,
                cwd: meta.cwd,
                cols: meta.cols,
                rows: meta.rows,
                created_at: meta.created_at,
                pid: meta.pid,
                exit_code: meta.exit_code,
            }),
            source: SessionSource::External,
            child_pid: None,
        });

        loop_task::spawn(handle.clone(), output_rx, backend_handle);
        self.insert(handle).await;
        self.change_notify.notify_waiters();
        Ok(())
    }

    /// Transition an external session to exited because its control
    /// directory was removed (spec §4.5).
    pub async fn mark_external_gone(&self, id: &str) {
        let sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(id) {
            handle.set_status(SessionStatus::Exited);
            handle.cancel.cancel();
        }
        drop(sessions);
        self.change_notify.notify_waiters();
    }

    async fn insert(&self, handle: Arc<SessionHandle>) {
        let id = handle.id.clone();
        self.sessions.lock().await.insert(id.clone(), handle.clone());

        tokio::spawn(async move {
            tokio::time::sleep(STARTUP_GRACE).await;
            if handle.status() == SessionStatus::Starting {
                handle.set_status(SessionStatus::Running);
                handle.persist();
            }
        });
    }

    pub async fn list(&self) -> Vec<SessionView> {
        let sessions = self.sessions.lock().await;
        let mut views = Vec::with_capacity(sessions.len());
        for handle in sessions.values() {
            let is_active = self.is_active(handle).await;
            views.push(handle.view(is_active));
        }
        views
    }

    pub async fn get(&self, id: &str) -> Result<SessionView, ErrorCode> {
        let sessions = self.sessions.lock().await;
        let handle = sessions.get(id).ok_or(ErrorCode::NotFound)?;
        let is_active = self.is_active(handle).await;
        Ok(handle.view(is_active))
    }

    async fn is_active(&self, handle: &Arc<SessionHandle>) -> bool {
        let screen = handle.screen.lock().await;
        let snapshot = screen.snapshot();
        drop(screen);
        let last_line = snapshot.lines.iter().rev().find(|l| !l.trim().is_empty());
        handle.activity.is_active(last_line.map_or("", String::as_str))
    }

    async fn handle(&self, id: &str) -> Result<Arc<SessionHandle>, ErrorCode> {
        self.sessions.lock().await.get(id).cloned().ok_or(ErrorCode::NotFound)
    }

    /// Fast-path read of recent `stdout` bytes from the session's in-memory
    /// ring cache; `None` means the caller should fall back to a file read
    /// at `self.control_root().join(id).join("stdout")` (spec.md §3: the
    /// file remains authoritative, this is a cache only).
    pub async fn read_ring_from(&self, id: &str, from: u64) -> Result<Option<Vec<u8>>, ErrorCode> {
        let handle = self.handle(id).await?;
        Ok(handle.recorder.read_ring_from(from))
    }

    pub async fn input(&self, id: &str, payload: InputPayload) -> Result<(), ErrorCode> {
        let handle = self.handle(id).await?;
        if handle.status() != SessionStatus::Running {
            return Err(ErrorCode::SessionExited);
        }
        let bytes = match payload {
            InputPayload::Text(text) => Bytes::from(text.into_bytes()),
            InputPayload::Key(key) => Bytes::from_static(key.to_bytes()),
        };
        handle.recorder.append_input(&bytes);
        handle.input_queue.push(bytes);
        Ok(())
    }

    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), ErrorCode> {
        let cols = cols.clamp(1, 1000);
        let rows = rows.clamp(1, 1000);
        let handle = self.handle(id).await?;
        if handle.status() == SessionStatus::Exited {
            return Err(ErrorCode::SessionExited);
        }
        handle.recorder.append_resize(cols, rows);
        (handle.resize_fn)(cols, rows).map_err(|e| {
            warn!(session_id = %id, error = %e, "resize ioctl failed");
            ErrorCode::Internal
        })?;
        {
            let mut screen = handle.screen.lock().await;
            screen.resize(cols, rows);
        }
        {
            let mut meta = handle.meta.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            meta.cols = cols;
            meta.rows = rows;
        }
        handle.persist();
        Ok(())
    }

    pub async fn rename(&self, id: &str, new_name: String) -> Result<(), ErrorCode> {
        let handle = self.handle(id).await?;
        if handle.status() == SessionStatus::Exited {
            return Err(ErrorCode::SessionExited);
        }
        let changed = {
            let mut meta = handle.meta.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let changed = meta.name.as_deref() != Some(new_name.as_str());
            meta.name = Some(new_name);
            changed
        };
        // Idempotent rename (spec §8 property 7): a no-op name doesn't
        // rewrite session.json.
        if changed {
            handle.persist();
        }
        Ok(())
    }

    /// Kill a session, escalating from `signal` (default `SIGTERM`) to
    /// `SIGKILL` after [`KILL_ESCALATION`] if it's still running.
    pub async fn kill(&self, id: &str, signal: Option<Signal>) -> Result<(), ErrorCode> {
        let handle = self.handle(id).await?;
        if handle.status() == SessionStatus::Exited {
            return Err(ErrorCode::SessionExited);
        }
        let Some(pid) = handle.child_pid else {
            // External sessions have nothing to kill locally; only the
            // owning out-of-process producer can end them.
            return Err(ErrorCode::BadRequest);
        };
        let sig = signal.unwrap_or(Signal::SIGTERM);
        let _ = kill(Pid::from_raw(pid as i32), sig);

        let escalate_handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(KILL_ESCALATION).await;
            if escalate_handle.status() == SessionStatus::Running {
                debug!(session_id = %escalate_handle.id, "kill escalation: sending SIGKILL");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        });
        Ok(())
    }

    /// Remove a session's bookkeeping. Only actually deletes the control
    /// directory once the session has exited and has no live subscribers,
    /// unless `force` is set.
    pub async fn remove(&self, id: &str, force: bool) -> Result<(), ErrorCode> {
        if self.handle(id).await?.status() != SessionStatus::Exited {
            self.kill(id, None).await.ok();
        }
        let handle = self.handle(id).await?;
        let no_subscribers = self.fanout.subscriber_count(id) == 0;
        if force || (handle.status() == SessionStatus::Exited && no_subscribers) {
            self.sessions.lock().await.remove(id);
            self.fanout.remove_session(id);
            let _ = std::fs::remove_dir_all(&handle.dir);
            self.change_notify.notify_waiters();
        }
        Ok(())
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity
    }

    /// Flush every session's recorder to disk (spec §4.10/C11: shutdown asks
    /// C4 to flush all recording writers without killing any child).
    pub async fn flush_all(&self) {
        let sessions = self.sessions.lock().await;
        for handle in sessions.values() {
            handle.recorder.flush();
        }
    }
}
