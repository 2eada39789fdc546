//! Bounded outbound queue with priority preemption (spec §4.2 Backpressure).
//!
//! A plain `tokio::mpsc` channel can't let a high-priority frame evict a
//! buffered low-priority one, so the queue is a `Mutex<VecDeque>` + `Notify`
//! pair instead — the writer task awaits `Notify`, the sender mutates the
//! deque directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::protocol::frame::Frame;

#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub frame: Frame,
    pub priority: bool,
}

struct QueueInner {
    items: Mutex<VecDeque<OutboundFrame>>,
    capacity: usize,
    notify_writer: Notify,
    notify_sender: Notify,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct OutboundQueue(Arc<QueueInner>);

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(QueueInner {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify_writer: Notify::new(),
            notify_sender: Notify::new(),
            closed: AtomicBool::new(false),
        }))
    }

    /// Enqueues `frame`. If full: a `Priority`/`Error` frame evicts the
    /// lowest-priority pending entry (FIFO among ties); otherwise this call
    /// waits up to `suspend_timeout` for room to drain.
    pub async fn send(&self, frame: OutboundFrame, suspend_timeout: Duration) -> bool {
        loop {
            if self.0.closed.load(Ordering::Acquire) {
                return false;
            }
            {
                let mut items = self.0.items.lock();
                if items.len() < self.0.capacity {
                    items.push_back(frame);
                    self.0.notify_writer.notify_one();
                    return true;
                }
                if frame.priority {
                    if let Some(pos) = items.iter().position(|existing| !existing.priority) {
                        items.remove(pos);
                        items.push_back(frame);
                        self.0.notify_writer.notify_one();
                        return true;
                    }
                }
            }
            let wait = self.0.notify_sender.notified();
            if tokio::time::timeout(suspend_timeout, wait).await.is_err() {
                return false;
            }
        }
    }

    pub async fn recv(&self) -> Option<OutboundFrame> {
        loop {
            {
                let mut items = self.0.items.lock();
                if let Some(frame) = items.pop_front() {
                    self.0.notify_sender.notify_one();
                    return Some(frame);
                }
            }
            if self.0.closed.load(Ordering::Acquire) {
                return None;
            }
            self.0.notify_writer.notified().await;
        }
    }

    pub fn close(&self) {
        self.0.closed.store(true, Ordering::Release);
        self.0.notify_writer.notify_waiters();
        self.0.notify_sender.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.0.items.lock().len()
    }
}

/// A handle the rest of the system keeps for a live connection; the
/// Connection Manager owns I/O state exclusively (spec §3 Lifecycle), other
/// components only reach it through this handle.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub connection_id: u64,
    pub tenant_id: String,
    pub agent_id: Option<String>,
    outbound: OutboundQueue,
}

impl ConnectionHandle {
    pub fn new(connection_id: u64, tenant_id: String, agent_id: Option<String>, queue_capacity: usize) -> Self {
        Self {
            connection_id,
            tenant_id,
            agent_id,
            outbound: OutboundQueue::new(queue_capacity),
        }
    }

    pub async fn send(&self, frame: Frame, priority: bool, suspend_timeout: Duration) -> bool {
        self.outbound.send(OutboundFrame { frame, priority }, suspend_timeout).await
    }

    pub(crate) fn queue(&self) -> OutboundQueue {
        self.outbound.clone()
    }

    pub fn close(&self) {
        self.outbound.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{Frame, FrameFlags, FrameType, Method};

    fn frame(seq: u64) -> Frame {
        Frame::new(FrameType::Request, seq, Method::Ping as u16, FrameFlags::empty(), Vec::new())
    }

    #[tokio::test]
    async fn priority_frame_evicts_lowest_priority_when_full() {
        let queue = OutboundQueue::new(1);
        assert!(queue.send(OutboundFrame { frame: frame(1), priority: false }, Duration::from_millis(50)).await);

        let evicted = queue.send(OutboundFrame { frame: frame(2), priority: true }, Duration::from_millis(50)).await;
        assert!(evicted);

        let next = queue.recv().await.unwrap();
        assert_eq!(next.frame.sequence_id, 2);
    }

    #[tokio::test]
    async fn send_suspends_until_drain_when_not_evictable() {
        let queue = OutboundQueue::new(1);
        assert!(queue.send(OutboundFrame { frame: frame(1), priority: false }, Duration::from_millis(50)).await);

        let queue2 = queue.clone();
        let sender = tokio::spawn(async move {
            queue2.send(OutboundFrame { frame: frame(2), priority: false }, Duration::from_millis(500)).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.recv().await.unwrap();

        assert!(sender.await.unwrap());
    }
}
