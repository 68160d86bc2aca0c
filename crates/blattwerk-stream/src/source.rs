// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Append-only growable byte buffer with async suspension.
//
// Producers (host streams, file readers) append bytes and eventually close
// the stream; decode tasks await byte ranges instead of polling. A source
// can be sliced into windows that share the underlying buffer and wakeups —
// bundled documents hand each member file a window of the root stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use blattwerk_core::error::{BlattwerkError, Result};

/// Buffer state shared by a root source and all of its windows.
struct Shared {
    state: Mutex<BufState>,
    /// Signalled on every append, close, and stop.
    grew: Notify,
}

struct BufState {
    buf: Vec<u8>,
    /// End of stream: no further bytes will ever arrive.
    eof: bool,
    /// Whole stream stopped: every access fails from now on.
    stopped: bool,
}

/// An incrementally-fillable byte buffer supporting blocking reads and
/// arrival wakeups.
///
/// Reads are relative to this handle's window; the root source's window is
/// the whole stream. Stopping a window never stops its parent.
pub struct ByteSource {
    shared: Arc<Shared>,
    /// Absolute start of this handle's window.
    window_off: usize,
    /// Window length, if bounded. `None` means "to end of stream".
    window_len: Option<usize>,
    /// Permanent stop of this window only.
    window_stopped: AtomicBool,
    /// Bumped by a blocked-only stop; waiters that entered under an older
    /// epoch fail, new waits proceed.
    cancel_epoch: AtomicU64,
}

impl ByteSource {
    /// Create an empty root source.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BufState {
                    buf: Vec::new(),
                    eof: false,
                    stopped: false,
                }),
                grew: Notify::new(),
            }),
            window_off: 0,
            window_len: None,
            window_stopped: AtomicBool::new(false),
            cancel_epoch: AtomicU64::new(0),
        })
    }

    /// Create a root source already holding `bytes` with end-of-stream set.
    pub fn from_bytes(bytes: Vec<u8>) -> Arc<Self> {
        let src = Self::new();
        src.append(&bytes);
        src.close();
        src
    }

    /// A window onto `len` bytes starting at `offset` of this handle's view.
    ///
    /// The window shares the parent's buffer and wakeups but carries its own
    /// stop flag.
    pub fn slice(self: &Arc<Self>, offset: usize, len: usize) -> Arc<ByteSource> {
        Arc::new(ByteSource {
            shared: Arc::clone(&self.shared),
            window_off: self.window_off + offset,
            window_len: Some(len),
            window_stopped: AtomicBool::new(self.window_stopped.load(Ordering::Acquire)),
            cancel_epoch: AtomicU64::new(0),
        })
    }

    fn is_root(&self) -> bool {
        self.window_off == 0 && self.window_len.is_none()
    }

    // -- Producer side --------------------------------------------------------

    /// Append bytes to the underlying stream. Producer-side call; feeding
    /// always happens through the root handle.
    pub fn append(&self, bytes: &[u8]) {
        debug_assert!(self.is_root(), "append through a window");
        {
            let mut state = self.shared.state.lock();
            if state.eof || state.stopped {
                debug!(len = bytes.len(), "append after close/stop ignored");
                return;
            }
            state.buf.extend_from_slice(bytes);
            trace!(total = state.buf.len(), added = bytes.len(), "bytes arrived");
        }
        self.shared.grew.notify_waiters();
    }

    /// Mark end of stream: waits for unreachable ranges fail from now on.
    pub fn close(&self) {
        debug_assert!(self.is_root(), "close through a window");
        {
            let mut state = self.shared.state.lock();
            state.eof = true;
            debug!(total = state.buf.len(), "stream closed");
        }
        self.shared.grew.notify_waiters();
    }

    /// Cancel reads.
    ///
    /// With `blocked_only`, only reads suspended at this moment fail; future
    /// reads may still succeed once data shows up. Without it, every current
    /// and future access on this handle (root: on the whole stream) fails.
    pub fn stop(&self, blocked_only: bool) {
        if blocked_only {
            self.cancel_epoch.fetch_add(1, Ordering::AcqRel);
        } else if self.is_root() {
            self.shared.state.lock().stopped = true;
        } else {
            self.window_stopped.store(true, Ordering::Release);
        }
        self.shared.grew.notify_waiters();
    }

    // -- Inspection -----------------------------------------------------------

    fn stopped(&self) -> bool {
        self.window_stopped.load(Ordering::Acquire) || self.shared.state.lock().stopped
    }

    /// Bytes currently available inside this window.
    pub fn len(&self) -> usize {
        let buffered = self.shared.state.lock().buf.len();
        let avail = buffered.saturating_sub(self.window_off);
        match self.window_len {
            Some(len) => avail.min(len),
            None => avail,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether no further bytes can arrive inside this window.
    pub fn is_closed(&self) -> bool {
        let state = self.shared.state.lock();
        if state.eof {
            return true;
        }
        match self.window_len {
            Some(len) => state.buf.len() >= self.window_off + len,
            None => false,
        }
    }

    /// Total window length, once knowable.
    pub fn total_len(&self) -> Option<usize> {
        if let Some(len) = self.window_len {
            return Some(len);
        }
        let state = self.shared.state.lock();
        state.eof.then(|| state.buf.len() - self.window_off)
    }

    /// Whether `[offset, offset+len)` of this window is fully buffered.
    pub fn has_range(&self, offset: usize, len: usize) -> bool {
        if let Some(window) = self.window_len {
            if offset + len > window {
                return false;
            }
        }
        let state = self.shared.state.lock();
        state.buf.len() >= self.window_off + offset + len
    }

    // -- Consumer side --------------------------------------------------------

    /// Suspend until `[offset, offset+len)` is buffered.
    ///
    /// Fails `MissingData` if the stream ends short of the range, `Stopped`
    /// if this window is stopped or a blocked-only stop fires while waiting.
    pub async fn wait_range(&self, offset: usize, len: usize) -> Result<()> {
        let entry_epoch = self.cancel_epoch.load(Ordering::Acquire);
        loop {
            // Register interest before checking, so an append racing with the
            // check cannot be missed.
            let notified = self.shared.grew.notified();

            if self.stopped() {
                return Err(BlattwerkError::Stopped);
            }
            if self.cancel_epoch.load(Ordering::Acquire) != entry_epoch {
                return Err(BlattwerkError::Stopped);
            }
            if self.has_range(offset, len) {
                return Ok(());
            }
            if self.out_of_reach(offset, len) {
                return Err(BlattwerkError::MissingData {
                    offset: offset as u64,
                    len: len as u64,
                });
            }

            notified.await;
        }
    }

    /// Whether the range can never be satisfied.
    fn out_of_reach(&self, offset: usize, len: usize) -> bool {
        if let Some(window) = self.window_len {
            if offset + len > window {
                return true;
            }
        }
        let state = self.shared.state.lock();
        state.eof && state.buf.len() < self.window_off + offset + len
    }

    /// Exact read: suspend until the range is buffered, then copy it out.
    pub async fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.wait_range(offset, len).await?;
        let state = self.shared.state.lock();
        let start = self.window_off + offset;
        Ok(state.buf[start..start + len].to_vec())
    }

    /// Read the whole window, suspending until its length is knowable.
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        loop {
            let notified = self.shared.grew.notified();
            if self.stopped() {
                return Err(BlattwerkError::Stopped);
            }
            if let Some(total) = self.total_len() {
                return self.read_at(0, total).await;
            }
            notified.await;
        }
    }

    /// Non-suspending read; `None` unless the full range is buffered.
    pub fn try_read_at(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        if !self.has_range(offset, len) {
            return None;
        }
        let state = self.shared.state.lock();
        let start = self.window_off + offset;
        Some(state.buf[start..start + len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn read_suspends_until_bytes_arrive() {
        let src = ByteSource::new();
        let reader = {
            let src = Arc::clone(&src);
            tokio::spawn(async move { src.read_at(2, 3).await })
        };

        // Feed in two increments; the read needs bytes [2, 5).
        src.append(b"ab");
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());
        src.append(b"cde");

        let bytes = reader.await.expect("join").expect("read");
        assert_eq!(bytes, b"cde");
    }

    #[tokio::test]
    async fn early_close_fails_with_missing_data() {
        let src = ByteSource::new();
        let reader = {
            let src = Arc::clone(&src);
            tokio::spawn(async move { src.read_at(0, 10).await })
        };

        src.append(b"short");
        src.close();

        let err = reader.await.expect("join").expect_err("must fail");
        assert!(matches!(err, BlattwerkError::MissingData { offset: 0, len: 10 }));
    }

    #[tokio::test]
    async fn blocked_only_stop_unblocks_current_reader_only() {
        let src = ByteSource::new();
        let reader = {
            let src = Arc::clone(&src);
            tokio::spawn(async move { src.read_at(0, 4).await })
        };

        // Let the reader suspend, then cancel only blocked reads.
        tokio::time::sleep(Duration::from_millis(20)).await;
        src.stop(true);

        let err = reader.await.expect("join").expect_err("must be stopped");
        assert!(err.is_cancellation());

        // A later read succeeds once the data shows up.
        src.append(b"data");
        assert_eq!(src.read_at(0, 4).await.expect("read"), b"data");
    }

    #[tokio::test]
    async fn full_stop_fails_future_reads() {
        let src = ByteSource::new();
        src.append(b"data");
        src.stop(false);
        let err = src.read_at(0, 4).await.expect_err("stopped");
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn window_reads_are_relative_and_bounded() {
        let src = ByteSource::new();
        src.append(b"aabbbbcc");
        let window = src.slice(2, 4);

        assert_eq!(window.read_at(0, 4).await.expect("read"), b"bbbb");
        assert!(window.is_closed());
        assert_eq!(window.total_len(), Some(4));

        // Beyond the window is unreachable regardless of the root's state.
        let err = window.read_at(2, 4).await.expect_err("out of window");
        assert!(matches!(err, BlattwerkError::MissingData { .. }));
    }

    #[tokio::test]
    async fn stopping_a_window_leaves_the_root_alive() {
        let src = ByteSource::new();
        src.append(b"0123456789");
        let window = src.slice(0, 4);
        window.stop(false);

        assert!(window.read_at(0, 1).await.is_err());
        assert_eq!(src.read_at(4, 2).await.expect("root read"), b"45");
    }

    #[tokio::test]
    async fn window_waits_for_bytes_crossing_its_start() {
        let src = ByteSource::new();
        let window = src.slice(4, 4);
        let reader = {
            let window = Arc::clone(&window);
            tokio::spawn(async move { window.read_at(0, 4).await })
        };

        src.append(b"head");
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());
        src.append(b"tail");

        assert_eq!(reader.await.expect("join").expect("read"), b"tail");
    }

    #[tokio::test]
    async fn read_all_waits_for_the_stream_to_close() {
        let src = ByteSource::new();
        let reader = {
            let src = Arc::clone(&src);
            tokio::spawn(async move { src.read_all().await })
        };

        src.append(b"every");
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());
        src.append(b"thing");
        src.close();

        assert_eq!(reader.await.expect("join").expect("read"), b"everything");
    }

    #[test]
    fn from_bytes_is_closed_and_complete() {
        let src = ByteSource::from_bytes(b"fixed".to_vec());
        assert!(src.is_closed());
        assert!(src.has_range(0, 5));
        assert_eq!(src.try_read_at(1, 3).expect("avail"), b"ixe");
        assert_eq!(src.try_read_at(3, 3), None);
    }
}
