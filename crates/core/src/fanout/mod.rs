// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket fan-out / buffer aggregator (spec §4.7, component C7).
//!
//! One process-wide [`Fanout`] owns a map of session id to subscriber list.
//! A session with no subscribers costs nothing beyond the map entry: the
//! session loop still feeds [`crate::screen::Screen`], but skips encoding.
//! Each subscriber is a bounded, drop-oldest frame queue so one slow
//! WebSocket client can't stall delivery to the others (spec §8 property 6).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::Notify;

/// Tag byte for the multiplexed wire frame (spec §4.7).
const WIRE_TAG: u8 = 0xBF;

/// Per-socket queue bound; beyond this the oldest frame is dropped and the
/// subscriber is marked stale so its next delivery is a full snapshot.
const MAX_QUEUE: usize = 64;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Prefix an encoded frame with the `0xBF <u32 sidLen LE> <sidBytes>` header
/// so one socket can multiplex frames for multiple sessions.
pub fn frame_message(session_id: &str, payload: &[u8]) -> Bytes {
    let sid = session_id.as_bytes();
    let mut buf = BytesMut::with_capacity(1 + 4 + sid.len() + payload.len());
    buf.put_u8(WIRE_TAG);
    buf.put_u32_le(sid.len() as u32);
    buf.put_slice(sid);
    buf.put_slice(payload);
    buf.freeze()
}

/// One subscriber's bounded, drop-oldest delivery queue.
pub struct Subscriber {
    id: u64,
    queue: Mutex<VecDeque<Bytes>>,
    /// Set when a frame was dropped for overflow; cleared once the next
    /// frame (always a full snapshot, so there's nothing further to do in
    /// V1) has gone out.
    stale: AtomicBool,
    notify: Notify,
}

impl Subscriber {
    fn new() -> Self {
        Self {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            queue: Mutex::new(VecDeque::new()),
            stale: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn push(&self, frame: Bytes) {
        let mut q = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if q.len() >= MAX_QUEUE {
            q.pop_front();
            self.stale.store(true, Ordering::Release);
        }
        q.push_back(frame);
        drop(q);
        self.notify.notify_one();
    }

    /// Wait for and return the next queued frame.
    pub async fn recv(&self) -> Bytes {
        loop {
            {
                let mut q = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(frame) = q.pop_front() {
                    if q.is_empty() {
                        self.stale.store(false, Ordering::Release);
                    }
                    return frame;
                }
            }
            self.notify.notified().await;
        }
    }
}

struct SessionChannel {
    last_frame: Mutex<Option<Bytes>>,
    subscribers: Mutex<Vec<std::sync::Arc<Subscriber>>>,
}

impl SessionChannel {
    fn new() -> Self {
        Self { last_frame: Mutex::new(None), subscribers: Mutex::new(Vec::new()) }
    }
}

/// Process-wide WebSocket buffer aggregator.
#[derive(Default)]
pub struct Fanout {
    sessions: Mutex<HashMap<String, std::sync::Arc<SessionChannel>>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, session_id: &str) -> std::sync::Arc<SessionChannel> {
        let mut sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| std::sync::Arc::new(SessionChannel::new()))
            .clone()
    }

    /// Subscribe to a session, returning the subscriber handle and an
    /// immediate snapshot frame if the session has produced one already.
    pub fn subscribe(&self, session_id: &str) -> (std::sync::Arc<Subscriber>, Option<Bytes>) {
        let channel = self.channel(session_id);
        let sub = std::sync::Arc::new(Subscriber::new());
        channel.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(sub.clone());
        let initial = channel.last_frame.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        if let Some(ref frame) = initial {
            sub.push(frame.clone());
        }
        (sub, initial)
    }

    pub fn unsubscribe(&self, session_id: &str, subscriber_id: u64) {
        let sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(channel) = sessions.get(session_id) {
            channel
                .subscribers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .retain(|s| s.id() != subscriber_id);
        }
    }

    /// How many live subscribers a session has — used to skip encoding
    /// entirely when it's zero.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.get(session_id).map_or(0, |c| c.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len())
    }

    /// Publish a newly-encoded snapshot frame for `session_id` to every
    /// subscriber. `frame` is the already-framed (0xBF-prefixed) message.
    pub fn publish(&self, session_id: &str, frame: Bytes) {
        let channel = self.channel(session_id);
        *channel.last_frame.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(frame.clone());
        for sub in channel.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).iter() {
            sub.push(frame.clone());
        }
    }

    /// Drop all bookkeeping for a session, e.g. once it has exited and has
    /// no remaining subscribers.
    pub fn remove_session(&self, session_id: &str) {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(session_id);
    }
}

#[cfg(test)]
#[path = "fanout_tests.rs"]
mod tests;
