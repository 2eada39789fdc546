//! Per-method dispatch queue with priority-ahead-of-FIFO ordering and a
//! concurrency cap (spec §4.3: "Per-method concurrency cap... Priority flag
//! routes the frame ahead of same-method queued work; ordering among equal
//! priority frames is FIFO").

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::protocol::frame::Frame;

pub struct DispatchItem {
    pub connection_id: u64,
    pub frame: Frame,
}

struct QueueInner {
    items: Mutex<VecDeque<DispatchItem>>,
    notify: Notify,
    capacity: usize,
}

/// One queue + worker pool per method. `concurrency` workers pull items and
/// run the handler; a priority item is pushed to the front so it's picked
/// up ahead of FIFO-ordered same-priority work, never reordering peers of
/// equal priority.
pub struct MethodDispatcher {
    queue: Arc<QueueInner>,
    semaphore: Arc<Semaphore>,
}

impl MethodDispatcher {
    pub fn new(queue_capacity: usize, concurrency: usize) -> Self {
        Self {
            queue: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::with_capacity(queue_capacity)),
                notify: Notify::new(),
                capacity: queue_capacity,
            }),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Returns `false` if the dispatch queue is full (caller maps this to
    /// `RateLimited`, spec §4.2 Backpressure "Inbound dispatch queue full").
    pub fn push(&self, item: DispatchItem, priority: bool) -> bool {
        let mut items = self.queue.items.lock();
        if items.len() >= self.queue.capacity {
            return false;
        }
        if priority {
            items.push_front(item);
        } else {
            items.push_back(item);
        }
        drop(items);
        self.queue.notify.notify_one();
        true
    }

    /// Spawns the worker pool; each worker holds one semaphore permit while
    /// running `handle`, bounding per-method concurrency.
    pub fn spawn_workers<F, Fut>(&self, handle: F)
    where
        F: Fn(DispatchItem) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = Arc::new(handle);
        let permits = self.semaphore.available_permits();
        for _ in 0..permits {
            let queue = Arc::clone(&self.queue);
            let semaphore = Arc::clone(&self.semaphore);
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                loop {
                    let item = loop {
                        if let Some(item) = queue.items.lock().pop_front() {
                            break item;
                        }
                        queue.notify.notified().await;
                    };
                    let _permit = semaphore.acquire().await.expect("semaphore not closed");
                    handle(item).await;
                }
            });
        }
    }
}
