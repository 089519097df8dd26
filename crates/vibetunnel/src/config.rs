// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI argument parsing (spec §6).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vibetunnel", version, about = "Proxies interactive terminal sessions over HTTP and WebSocket.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server.
    Serve(ServeArgs),
    /// Run a command attached to a new external session descriptor.
    Fwd(FwdArgs),
    /// Print the version and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// HTTP port to listen on.
    #[arg(long, env = "PORT", default_value_t = 4020)]
    pub port: u16,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Control directory holding one subdirectory per session.
    #[arg(long = "control-dir", env = "VIBETUNNEL_CONTROL_DIR")]
    pub control_dir: Option<PathBuf>,

    /// HQ base URL to register this node with (remote mode).
    #[arg(long, env = "VIBETUNNEL_HQ_URL", requires_all = ["hq_token", "name"])]
    pub hq: Option<String>,

    /// Bearer token presented to the HQ named by `--hq`.
    #[arg(long = "hq-token", env = "VIBETUNNEL_HQ_AUTH")]
    pub hq_token: Option<String>,

    /// Name this node registers itself as with the HQ.
    #[arg(long, env = "VIBETUNNEL_REMOTE_NAME")]
    pub name: Option<String>,

    /// Disable bearer-token authentication on the HTTP/WS surface.
    #[arg(long = "no-auth")]
    pub no_auth: bool,

    /// Bearer token required of callers, unless `--no-auth` is set.
    #[arg(long = "auth-token", env = "VIBETUNNEL_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    #[arg(long, env = "VIBETUNNEL_LOG_LEVEL", default_value = "info", hide = true)]
    pub log_level: String,

    #[arg(long, env = "VIBETUNNEL_DEBUG", default_value_t = false, hide = true)]
    pub debug: bool,
}

impl ServeArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.no_auth && self.auth_token.is_none() {
            anyhow::bail!("either --auth-token or --no-auth must be specified");
        }
        Ok(())
    }

    /// Resolve the control directory: `--control-dir`/`VIBETUNNEL_CONTROL_DIR`,
    /// else `$XDG_STATE_HOME/vibetunnel/control`, else
    /// `$HOME/.local/state/vibetunnel/control`.
    pub fn resolve_control_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.control_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("vibetunnel/control");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/vibetunnel/control");
        }
        PathBuf::from(".vibetunnel/control")
    }

    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }
}

#[derive(Args, Debug)]
pub struct FwdArgs {
    /// Id to give the new external session descriptor.
    pub session_id: String,

    /// Command to run (after `--`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,

    /// Control directory the session descriptor is created under.
    #[arg(long = "control-dir", env = "VIBETUNNEL_CONTROL_DIR")]
    pub control_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 80)]
    pub cols: u16,

    #[arg(long, default_value_t = 24)]
    pub rows: u16,
}

impl FwdArgs {
    pub fn resolve_control_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.control_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("vibetunnel/control");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/vibetunnel/control");
        }
        PathBuf::from(".vibetunnel/control")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
