// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, drop-oldest input buffer sitting in front of a backend's write
//! side (spec §4.3, component C3: `write` is non-blocking — if the
//! kernel-side input buffer is full the supervisor applies bounded internal
//! buffering and drops the oldest queued chunk on overflow, counting drops).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::warn;

/// Total bytes this queue holds before it starts dropping the oldest chunk.
const CAPACITY_BYTES: usize = 1024 * 1024;

struct State {
    items: VecDeque<Bytes>,
    bytes: usize,
}

/// Queues input chunks for one session's backend without ever blocking the
/// caller. A feeder task drains it and forwards each chunk to the backend's
/// real input channel, where any backpressure from a slow PTY actually
/// lands — this queue only ever absorbs it.
pub(super) struct InputQueue {
    state: StdMutex<State>,
    notify: Notify,
    dropped: AtomicU64,
}

impl InputQueue {
    pub(super) fn new() -> Self {
        Self {
            state: StdMutex::new(State { items: VecDeque::new(), bytes: 0 }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue `chunk`, never blocking. If the queue is over
    /// [`CAPACITY_BYTES`] afterwards, evicts from the front (oldest first)
    /// until it isn't, counting each eviction — `chunk` itself is never
    /// dropped by this call.
    pub(super) fn push(&self, chunk: Bytes) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.bytes += chunk.len();
        state.items.push_back(chunk);
        while state.bytes > CAPACITY_BYTES && state.items.len() > 1 {
            if let Some(evicted) = state.items.pop_front() {
                state.bytes -= evicted.len();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(total_dropped = total, "input queue overflow, dropping oldest chunk");
            }
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for and remove the oldest queued chunk.
    pub(super) async fn pop(&self) -> Bytes {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(chunk) = state.items.pop_front() {
                    state.bytes -= chunk.len();
                    return chunk;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Total chunks ever dropped for overflow.
    #[cfg(test)]
    pub(super) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "input_queue_tests.rs"]
mod tests;
