// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HQ federation (spec §4.9, component C9): a `vibetunnel-core::federation::Federation`
//! implementation for HQ mode, plus the self-registration client used in
//! remote mode. Neither piece runs its own HTTP server — both are wired into
//! the single `vibetunnel` process's router and lifecycle by the `vibetunnel`
//! binary crate, matching spec §6's single-process `serve` command.

mod client;
mod registry;
mod remote;

pub use registry::Registry;
pub use remote::RemoteAgent;
