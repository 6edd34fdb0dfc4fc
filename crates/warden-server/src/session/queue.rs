// crates/warden-server/src/session/queue.rs
// Bounded per-session outbound queue feeding the single SSE writer.
//
// Backpressure policy: a full queue drops the oldest notification and
// counts it; responses are never dropped — if no notification can be
// evicted the push fails and the caller closes the session.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::observability::metrics;

/// One frame bound for the SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// JSON-RPC response to a client request. Never dropped.
    Response(serde_json::Value),
    /// Server-initiated notification. Droppable under backpressure.
    Notification(serde_json::Value),
}

/// Why a response could not be enqueued.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// Queue full of undroppable frames; the session must close.
    Full,
    /// Queue already closed.
    Closed,
}

pub struct OutboundQueue {
    frames: Mutex<VecDeque<OutboundFrame>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a response, evicting the oldest notification if full.
    pub fn push_response(&self, payload: serde_json::Value) -> Result<(), PushError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PushError::Closed);
        }
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        if frames.len() >= self.capacity && !evict_oldest_notification(&mut frames) {
            return Err(PushError::Full);
        }
        frames.push_back(OutboundFrame::Response(payload));
        drop(frames);
        self.notify.notify_one();
        Ok(())
    }

    /// Enqueue a notification; silently dropped (and counted) when the
    /// queue is full of responses or closed.
    pub fn push_notification(&self, payload: serde_json::Value) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        if frames.len() >= self.capacity && !evict_oldest_notification(&mut frames) {
            metrics::record_sse_dropped();
            return;
        }
        frames.push_back(OutboundFrame::Notification(payload));
        drop(frames);
        self.notify.notify_one();
    }

    /// Wait for the next frame. Returns `None` once the queue is closed
    /// and drained.
    pub async fn pop(&self) -> Option<OutboundFrame> {
        loop {
            // Register interest before checking so a push between the
            // check and the await still wakes us.
            let notified = self.notify.notified();
            {
                let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue: pending frames still drain, new pushes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn evict_oldest_notification(frames: &mut VecDeque<OutboundFrame>) -> bool {
    let position = frames
        .iter()
        .position(|f| matches!(f, OutboundFrame::Notification(_)));
    match position {
        Some(idx) => {
            frames.remove(idx);
            metrics::record_sse_dropped();
            true
        }
        None => false,
    }
}
