//! Async event channel: device-originated notifications that are not tied
//! to any particular recv call.
//!
//! The queue is bounded. When full, the oldest event is dropped so the most
//! recent device state is always observable; the drop count is kept.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sdrio_core::ErrorCode;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncEventKind {
    SequenceError,
    Underflow,
    Overflow,
    LateCommand,
    BurstAck,
}

impl AsyncEventKind {
    /// Event carried by a frame's error field, if any.
    pub fn from_error_code(code: ErrorCode) -> Option<Self> {
        match code {
            ErrorCode::None => None,
            ErrorCode::Underflow => Some(Self::Underflow),
            ErrorCode::Overflow => Some(Self::Overflow),
            ErrorCode::SequenceError => Some(Self::SequenceError),
            ErrorCode::LateCommand => Some(Self::LateCommand),
            ErrorCode::BurstAck => Some(Self::BurstAck),
        }
    }
}

impl fmt::Display for AsyncEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SequenceError => "sequence error",
            Self::Underflow => "underflow",
            Self::Overflow => "overflow",
            Self::LateCommand => "late command",
            Self::BurstAck => "burst ack",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncEvent {
    /// Global channel index of the stream that raised the event.
    pub channel: usize,
    pub kind: AsyncEventKind,
    /// Device time in ticks, when the event carries one.
    pub timestamp: Option<u64>,
}

struct Inner {
    queue: Mutex<VecDeque<AsyncEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

/// Shared handle to the device's event queue. Cloning is cheap.
#[derive(Clone)]
pub struct AsyncEventQueue {
    inner: Arc<Inner>,
}

impl AsyncEventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                capacity,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn push(&self, event: AsyncEvent) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() == self.inner.capacity {
                queue.pop_front();
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!(channel = event.channel, kind = %event.kind, "async event");
            queue.push_back(event);
        }
        self.inner.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<AsyncEvent> {
        self.inner.queue.lock().pop_front()
    }

    /// Wait up to `timeout` for the next event. Returns `None` on timeout.
    pub async fn pop(&self, timeout: Duration) -> Option<AsyncEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a push between the
            // check and the await is not missed.
            let notified = self.inner.notify.notified();
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for AsyncEventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEventQueue")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("dropped", &self.dropped())
            .finish()
    }
}
