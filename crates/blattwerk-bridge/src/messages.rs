// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host message vocabulary and the thread-safe queue carrying it.
//
// Hosts consume messages pull-style (peek/wait/pop) or push-style via an
// optional callback fired on every enqueue. Message kinds mirror the decode
// state machines one-to-one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::trace;

use blattwerk_core::types::{JobStatus, Location, StreamId};

/// A message delivered to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Something failed; `text` is human-readable.
    Error { text: String },
    /// Informational status line.
    Info { text: String },
    /// The engine needs bytes for `location`; feed them to `stream` with
    /// `stream_write`/`stream_close`.
    NewStreamNeeded {
        stream: StreamId,
        name: String,
        location: Location,
    },
    /// Document structure (layout and directory) is known.
    DocInfoReady,
    /// Page geometry and data are fully decoded.
    PageInfoReady { page: u32 },
    /// Page geometry changed; hosts should re-run layout.
    RelayoutNeeded,
    /// Page pixels changed; hosts should repaint.
    RedisplayNeeded,
    /// One chunk finished decoding.
    ChunkDecoded { chunk: String },
    /// A thumbnail for `page` is available.
    ThumbnailReady { page: u32 },
    /// Background job heartbeat.
    JobProgress { percent: u8, status: JobStatus },
}

type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

struct QueueState {
    messages: VecDeque<Message>,
}

/// Thread-safe message queue with blocking waits and an enqueue callback.
pub struct MessageQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    /// Invoked outside the queue lock, so a callback may peek or pop.
    callback: Mutex<Option<Callback>>,
}

impl MessageQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
            }),
            ready: Condvar::new(),
            callback: Mutex::new(None),
        })
    }

    pub fn push(&self, message: Message) {
        trace!(?message, "message enqueued");
        {
            let mut state = self.state.lock();
            state.messages.push_back(message.clone());
        }
        self.ready.notify_all();
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(&message);
        }
    }

    /// Front message without removing it.
    pub fn peek(&self) -> Option<Message> {
        self.state.lock().messages.front().cloned()
    }

    /// Remove and return the front message.
    pub fn pop(&self) -> Option<Message> {
        self.state.lock().messages.pop_front()
    }

    /// Block the calling thread until a message is available (leaving it in
    /// the queue) or the timeout elapses. Host-thread-only.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(front) = state.messages.front() {
                return Some(front.clone());
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return state.messages.front().cloned();
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Install (or clear) the push-style callback.
    pub fn set_callback(&self, callback: Option<Callback>) {
        *self.callback.lock() = callback;
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
