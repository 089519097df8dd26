// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recording store (spec §4.1, component C1).
//!
//! Per session a control directory holds `session.json` (metadata, rewritten
//! atomically), `stdout` (an asciinema-v2-compatible header line followed by
//! newline-delimited event arrays), and an optional `stdin` audit log in the
//! same format under event kind `"i"`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::ring::RingBuffer;

/// Recording writes are buffered but flushed at least this often (spec §4.1).
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AsciinemaHeader {
    version: u32,
    width: u16,
    height: u16,
    timestamp: u64,
}

/// Session metadata, the contents of `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Exited,
}

/// Rewrite `session.json` atomically (write-temp + rename, spec §4.4).
pub fn write_session_json_atomic(dir: &Path, meta: &SessionMetadata) -> anyhow::Result<()> {
    let final_path = dir.join("session.json");
    let tmp_path = dir.join("session.json.tmp");
    let body = serde_json::to_vec_pretty(meta)?;
    fs::write(&tmp_path, &body)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

pub fn read_session_json(dir: &Path) -> anyhow::Result<SessionMetadata> {
    let data = fs::read(dir.join("session.json"))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Append-only writer for one session's `stdout` (and optional `stdin`) log.
pub struct Recorder {
    start: Instant,
    stdout: Mutex<File>,
    stdin: Option<Mutex<File>>,
    bytes_written: AtomicU64,
    last_clear_offset: AtomicU64,
    /// In-memory mirror of the most recent `stdout` bytes, so a client that
    /// subscribes to the live stream near the current offset doesn't need a
    /// file read (spec.md §3 still treats the file as the source of truth;
    /// this is a read-path cache only).
    ring: Mutex<RingBuffer>,
    /// Set by [`Recorder::open_external`]: an out-of-process producer owns
    /// this `stdout`, so every `append_*` is a no-op rather than writing
    /// back into the file this recorder's own session is tailing (spec §4.5).
    read_only: bool,
}

impl Recorder {
    /// Create the control directory (if needed) and open the event log(s),
    /// writing the asciinema-v2 header line. `ring_capacity` bounds the
    /// in-memory replay cache (see [`Recorder::read_ring_from`]).
    pub fn create(
        dir: &Path,
        cols: u16,
        rows: u16,
        record_input: bool,
        ring_capacity: usize,
    ) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)?;

        let header = AsciinemaHeader { version: 2, width: cols, height: rows, timestamp: now_unix_secs() };
        let mut header_line = serde_json::to_string(&header)?;
        header_line.push('\n');

        let mut stdout = OpenOptions::new().create(true).append(true).open(dir.join("stdout"))?;
        stdout.write_all(header_line.as_bytes())?;
        stdout.flush()?;
        let bytes_written = header_line.len() as u64;

        let stdin = if record_input {
            let mut f = OpenOptions::new().create(true).append(true).open(dir.join("stdin"))?;
            f.write_all(header_line.as_bytes())?;
            f.flush()?;
            Some(Mutex::new(f))
        } else {
            None
        };

        let mut ring = RingBuffer::new(ring_capacity.max(1));
        ring.write(header_line.as_bytes());

        Ok(Self {
            start: Instant::now(),
            stdout: Mutex::new(stdout),
            stdin,
            bytes_written: AtomicU64::new(bytes_written),
            last_clear_offset: AtomicU64::new(0),
            ring: Mutex::new(ring),
            read_only: false,
        })
    }

    /// Attach to an already-running external session's `stdout` (spec §4.5)
    /// without writing a header or anything else: the out-of-process
    /// producer is the sole writer of this file, so every `append_*` call on
    /// the returned `Recorder` is a no-op. Used only for the recorder's
    /// bookkeeping fields the rest of the session machinery expects
    /// (`bytes_written`, `last_clear_offset`); actual replay reads the file
    /// directly, never through this instance.
    pub fn open_external(dir: &Path, ring_capacity: usize) -> anyhow::Result<Self> {
        let stdout = OpenOptions::new().append(true).open(dir.join("stdout"))?;
        Ok(Self {
            start: Instant::now(),
            stdout: Mutex::new(stdout),
            stdin: None,
            bytes_written: AtomicU64::new(0),
            last_clear_offset: AtomicU64::new(0),
            ring: Mutex::new(RingBuffer::new(ring_capacity.max(1))),
            read_only: true,
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// A PTY output chunk. Invalid UTF-8 is replaced lossily — the recording
    /// format carries text, not raw bytes.
    pub fn append_output(&self, chunk: &[u8]) {
        if self.read_only {
            return;
        }
        let t = self.elapsed_secs();
        self.write_stdout_event(&json!(["o", t, String::from_utf8_lossy(chunk)]));
    }

    /// Must be recorded before any subsequent `output` event at the new size.
    pub fn append_resize(&self, cols: u16, rows: u16) {
        if self.read_only {
            return;
        }
        let t = self.elapsed_secs();
        self.write_stdout_event(&json!(["r", t, cols, rows]));
    }

    pub fn append_clear(&self) {
        if self.read_only {
            return;
        }
        let t = self.elapsed_secs();
        self.write_stdout_event(&json!(["x", t]));
        self.last_clear_offset.store(self.bytes_written.load(Ordering::Acquire), Ordering::Release);
    }

    pub fn append_exit(&self, code: i32) {
        if self.read_only {
            return;
        }
        let t = self.elapsed_secs();
        self.write_stdout_event(&json!(["e", t, code]));
        self.flush();
    }

    /// Record input, if the `stdin` audit log was enabled at creation.
    pub fn append_input(&self, data: &[u8]) {
        if self.read_only {
            return;
        }
        let Some(stdin) = self.stdin.as_ref() else { return };
        let t = self.elapsed_secs();
        let Ok(mut line) = serde_json::to_string(&json!(["i", t, String::from_utf8_lossy(data)]))
        else {
            return;
        };
        line.push('\n');
        if let Ok(mut f) = stdin.lock() {
            let _ = f.write_all(line.as_bytes());
        }
    }

    fn write_stdout_event(&self, value: &serde_json::Value) {
        let Ok(mut line) = serde_json::to_string(value) else { return };
        line.push('\n');
        if let Ok(mut f) = self.stdout.lock() {
            let _ = f.write_all(line.as_bytes());
        }
        if let Ok(mut ring) = self.ring.lock() {
            ring.write(line.as_bytes());
        }
        self.bytes_written.fetch_add(line.len() as u64, Ordering::AcqRel);
    }

    /// Serve a replay request from the in-memory ring cache when possible,
    /// falling back to a `None` that tells the caller to read the file
    /// instead (the offset predates what the ring retains).
    pub fn read_ring_from(&self, from: u64) -> Option<Vec<u8>> {
        let ring = self.ring.lock().ok()?;
        let (a, b) = ring.read_from(from)?;
        Some([a, b].concat())
    }

    pub fn flush(&self) {
        if let Ok(mut f) = self.stdout.lock() {
            let _ = f.flush();
        }
        if let Some(stdin) = self.stdin.as_ref() {
            if let Ok(mut f) = stdin.lock() {
                let _ = f.flush();
            }
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    pub fn last_clear_offset(&self) -> u64 {
        self.last_clear_offset.load(Ordering::Acquire)
    }
}

/// Spawn a background task that flushes `recorder` at [`FLUSH_INTERVAL`]
/// until `shutdown` fires, flushing once more on the way out.
pub fn spawn_flush_loop(recorder: std::sync::Arc<Recorder>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => recorder.flush(),
            }
        }
        recorder.flush();
    });
}

/// Result of replaying events from a byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEvents {
    pub events: Vec<serde_json::Value>,
    pub next_offset: u64,
}

/// Replay events from the `stdout` log at `path`, starting at byte offset
/// `from`. If `from` does not land on a line boundary, bytes up to the next
/// newline are skipped (spec §4.1). `from == 0` also skips the header line,
/// since it is metadata rather than a recording event. A truncated final
/// line (a crash mid-write) is discarded rather than returned.
pub fn replay_from(path: &Path, from: u64) -> io::Result<ReplayEvents> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let from = from.min(len);

    let aligned = if from == 0 {
        true
    } else {
        let mut byte = [0u8; 1];
        file.seek(SeekFrom::Start(from - 1))?;
        file.read_exact(&mut byte).is_ok() && byte[0] == b'\n'
    };

    file.seek(SeekFrom::Start(from))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let mut cursor = 0usize;
    if !aligned {
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => cursor = pos + 1,
            None => return Ok(ReplayEvents { events: vec![], next_offset: len }),
        }
    }

    if from == 0 {
        match buf[cursor..].iter().position(|&b| b == b'\n') {
            Some(pos) => cursor += pos + 1,
            None => return Ok(ReplayEvents { events: vec![], next_offset: from + cursor as u64 }),
        }
    }

    let mut events = Vec::new();
    for line in buf[cursor..].split_inclusive(|&b| b == b'\n') {
        if line.last() != Some(&b'\n') {
            break;
        }
        let text = &line[..line.len() - 1];
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(text) {
            events.push(value);
        }
        cursor += line.len();
    }

    Ok(ReplayEvents { events, next_offset: from + cursor as u64 })
}

#[cfg(test)]
#[path = "recording_tests.rs"]
mod tests;
