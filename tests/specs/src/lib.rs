// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario tests (spec §8, S1-S6).
//!
//! Spawns the real `vibetunnel` binary as a subprocess and exercises it
//! over its HTTP/SSE/WebSocket surface, the same way an external
//! collaborator would.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

use vibetunnel_core::codec::{self, Row};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `vibetunnel` binary.
pub fn vibetunnel_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("vibetunnel")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Builder for a `vibetunnel serve` subprocess under test.
pub struct ServeBuilder {
    auth_token: Option<String>,
    hq: Option<(String, String, String)>,
}

impl Default for ServeBuilder {
    fn default() -> Self {
        Self { auth_token: None, hq: None }
    }
}

impl ServeBuilder {
    /// Require `token` as the bearer credential instead of running `--no-auth`.
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Register this node with an external HQ on boot (`--hq`/`--hq-token`/`--name`).
    pub fn hq(mut self, hq_url: &str, hq_token: &str, name: &str) -> Self {
        self.hq = Some((hq_url.to_owned(), hq_token.to_owned(), name.to_owned()));
        self
    }

    pub fn spawn(self) -> anyhow::Result<ServeProcess> {
        ensure_crypto();
        let binary = vibetunnel_binary();
        anyhow::ensure!(binary.exists(), "vibetunnel binary not found at {}", binary.display());

        let port = free_port()?;
        let control_dir = tempfile::tempdir()?;

        let mut args: Vec<String> = vec![
            "serve".into(),
            "--port".into(),
            port.to_string(),
            "--bind".into(),
            "127.0.0.1".into(),
            "--control-dir".into(),
            control_dir.path().to_string_lossy().into_owned(),
        ];
        match &self.auth_token {
            Some(token) => args.extend(["--auth-token".into(), token.clone()]),
            None => args.push("--no-auth".into()),
        }
        if let Some((hq_url, hq_token, name)) = &self.hq {
            args.extend([
                "--hq".into(),
                hq_url.clone(),
                "--hq-token".into(),
                hq_token.clone(),
                "--name".into(),
                name.clone(),
            ]);
        }

        let child = Command::new(&binary)
            .args(&args)
            .env("VIBETUNNEL_LOG_LEVEL", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(ServeProcess { child, port, control_dir })
    }
}

/// A running `vibetunnel serve` process, killed on drop.
pub struct ServeProcess {
    child: Child,
    port: u16,
    control_dir: tempfile::TempDir,
}

impl ServeProcess {
    /// Spawn with `--no-auth` and no federation (the common case).
    pub fn start() -> anyhow::Result<Self> {
        ServeBuilder::default().spawn()
    }

    pub fn build() -> ServeBuilder {
        ServeBuilder::default()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_buffers_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws/buffers", self.port)
    }

    pub fn control_dir(&self) -> &Path {
        self.control_dir.path()
    }

    /// Poll `/api/health` until it answers, or time out.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/api/health", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("vibetunnel did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// `POST /api/sessions`, returning the new session id.
pub async fn create_session(
    client: &reqwest::Client,
    base_url: &str,
    command: &[&str],
    cols: u16,
    rows: u16,
) -> anyhow::Result<String> {
    let resp = client
        .post(format!("{base_url}/api/sessions"))
        .json(&serde_json::json!({
            "command": command,
            "cols": cols,
            "rows": rows,
        }))
        .send()
        .await?;
    anyhow::ensure!(resp.status().is_success(), "create failed: {}", resp.status());
    let body: serde_json::Value = resp.json().await?;
    Ok(body["session_id"].as_str().unwrap_or_default().to_owned())
}

/// Poll `GET /api/sessions/:id` until `pred` accepts the view, or time out.
pub async fn wait_for_session(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    timeout: Duration,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> anyhow::Result<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("session {id} never matched the expected condition within {timeout:?}");
        }
        let resp = client.get(format!("{base_url}/api/sessions/{id}")).send().await?;
        if resp.status().is_success() {
            let view: serde_json::Value = resp.json().await?;
            if pred(&view) {
                return Ok(view);
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Read `GET /api/sessions/:id/stream?from=0` until `needle` shows up in the
/// raw SSE body, or time out.
pub async fn wait_for_stream_contains(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    needle: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    use futures_util::StreamExt;

    let url = format!("{base_url}/api/sessions/{id}/stream?from=0");
    let resp = client.get(&url).send().await?;
    anyhow::ensure!(resp.status().is_success(), "stream failed: {}", resp.status());

    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("stream never contained {needle:?}");
        }
        let Some(chunk) = tokio::time::timeout(Duration::from_millis(500), stream.next()).await.ok().flatten()
        else {
            continue;
        };
        buf.extend_from_slice(&chunk?);
        if String::from_utf8_lossy(&buf).contains(needle) {
            return Ok(());
        }
    }
}

/// Read `GET /api/sessions/:id/stream?from=0` for up to `duration`,
/// returning whatever raw SSE text accumulated (the stream itself never
/// completes on its own for a still-running session).
pub async fn read_stream_prefix(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    duration: Duration,
) -> anyhow::Result<String> {
    use futures_util::StreamExt;

    let url = format!("{base_url}/api/sessions/{id}/stream?from=0");
    let resp = client.get(&url).send().await?;
    anyhow::ensure!(resp.status().is_success(), "stream failed: {}", resp.status());

    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) else {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        };
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk?),
            Ok(None) => return Ok(String::from_utf8_lossy(&buf).into_owned()),
            Err(_) => return Ok(String::from_utf8_lossy(&buf).into_owned()),
        }
    }
}

/// One decoded `/ws/buffers` frame for session `session_id`.
pub struct BufferFrame {
    pub session_id: String,
    pub frame: codec::Frame,
}

/// Strip the `0xBF <u32 sidLen LE> <sidBytes>` multiplexing header and
/// decode the remaining bytes as a codec frame (mirror of
/// `vibetunnel_core::fanout::frame_message`, client side).
pub fn decode_buffer_message(data: &[u8]) -> anyhow::Result<BufferFrame> {
    anyhow::ensure!(data.first() == Some(&0xBF), "missing 0xBF multiplex tag");
    anyhow::ensure!(data.len() >= 5, "multiplex header truncated");
    let sid_len = u32::from_le_bytes(data[1..5].try_into()?) as usize;
    anyhow::ensure!(data.len() >= 5 + sid_len, "session id truncated");
    let session_id = String::from_utf8(data[5..5 + sid_len].to_vec())?;
    let frame = codec::decode(&data[5 + sid_len..]).map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(BufferFrame { session_id, frame })
}

/// Flatten a decoded frame's grid into plain text, one row per line, so
/// assertions can just look for a substring.
pub fn frame_text(frame: &codec::Frame) -> String {
    let mut out = String::new();
    for row in &frame.grid_rows {
        match row {
            Row::EmptyRun(count) => {
                for _ in 0..*count {
                    out.push('\n');
                }
            }
            Row::Cells(cells) => {
                for cell in cells {
                    if let Some(c) = char::from_u32(cell.codepoint) {
                        out.push(c);
                    }
                }
                out.push('\n');
            }
        }
    }
    out
}
