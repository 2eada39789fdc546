//! In-memory [`QueueBroker`] driven by a [`crate::clock::Clock`] so lease
//! expiry and redelivery can be tested deterministically without sleeping.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{QueueBroker, QueueMessage};
use crate::clock::SharedClock;
use crate::error::CoreResult;

struct Envelope {
    task_id: Uuid,
    priority: u8,
    receive_count: u32,
    visible_at: Instant,
    visibility_timeout: Duration,
}

pub struct MemoryQueueBroker {
    clock: SharedClock,
    max_receive_count: u32,
    messages: Mutex<HashMap<String, Envelope>>,
    dead_letters: Mutex<Vec<QueueMessage>>,
}

impl MemoryQueueBroker {
    pub fn new(clock: SharedClock, max_receive_count: u32) -> Self {
        Self {
            clock,
            max_receive_count,
            messages: Mutex::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl QueueBroker for MemoryQueueBroker {
    async fn enqueue(&self, task_id: Uuid, priority: u8, visibility_timeout: Duration) -> CoreResult<String> {
        let receipt = Uuid::new_v4().to_string();
        self.messages.lock().insert(
            receipt.clone(),
            Envelope {
                task_id,
                priority,
                receive_count: 0,
                visible_at: self.clock.now(),
                visibility_timeout,
            },
        );
        Ok(receipt)
    }

    async fn receive(&self, max_messages: u32, _wait_time: Duration) -> CoreResult<Vec<QueueMessage>> {
        let now = self.clock.now();
        let mut messages = self.messages.lock();
        let mut dead_letters = Vec::new();

        let mut ready: Vec<(&String, &mut Envelope)> = messages
            .iter_mut()
            .filter(|(_, env)| env.visible_at <= now)
            .collect();
        ready.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));

        let mut picked = Vec::new();
        for (receipt, envelope) in ready.into_iter().take(max_messages as usize) {
            envelope.receive_count += 1;
            envelope.visible_at = now + envelope.visibility_timeout;
            if envelope.receive_count > self.max_receive_count {
                dead_letters.push(QueueMessage {
                    receipt: receipt.clone(),
                    task_id: envelope.task_id,
                    priority: envelope.priority,
                    receive_count: envelope.receive_count,
                });
            } else {
                picked.push(QueueMessage {
                    receipt: receipt.clone(),
                    task_id: envelope.task_id,
                    priority: envelope.priority,
                    receive_count: envelope.receive_count,
                });
            }
        }

        for dl in &dead_letters {
            messages.remove(&dl.receipt);
        }
        drop(messages);
        if !dead_letters.is_empty() {
            self.dead_letters.lock().extend(dead_letters);
        }

        Ok(picked)
    }

    async fn delete(&self, receipt: &str) -> CoreResult<()> {
        self.messages.lock().remove(receipt);
        Ok(())
    }

    async fn change_message_visibility(&self, receipt: &str, timeout: Duration) -> CoreResult<()> {
        let now = self.clock.now();
        if let Some(envelope) = self.messages.lock().get_mut(receipt) {
            envelope.visible_at = now + timeout;
            envelope.visibility_timeout = timeout;
        }
        Ok(())
    }

    async fn drain_dead_letters(&self) -> CoreResult<Vec<QueueMessage>> {
        Ok(std::mem::take(&mut *self.dead_letters.lock()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteerableClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn redelivers_after_visibility_timeout() {
        let clock = Arc::new(SteerableClock::new());
        let broker = MemoryQueueBroker::new(clock.clone(), 5);
        let task_id = Uuid::new_v4();
        broker.enqueue(task_id, 1, Duration::from_millis(100)).await.unwrap();

        let first = broker.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);

        let empty = broker.receive(10, Duration::ZERO).await.unwrap();
        assert!(empty.is_empty(), "message still leased, should not redeliver yet");

        clock.advance(Duration::from_millis(101));
        let redelivered = broker.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].receive_count, 2);
    }

    #[tokio::test]
    async fn moves_to_dlq_after_max_receive_count() {
        let clock = Arc::new(SteerableClock::new());
        let broker = MemoryQueueBroker::new(clock.clone(), 2);
        let task_id = Uuid::new_v4();
        broker.enqueue(task_id, 0, Duration::from_millis(1)).await.unwrap();

        for _ in 0..2 {
            broker.receive(10, Duration::ZERO).await.unwrap();
            clock.advance(Duration::from_millis(2));
        }
        let third = broker.receive(10, Duration::ZERO).await.unwrap();
        assert!(third.is_empty());

        let dead = broker.drain_dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task_id, task_id);
    }

    #[tokio::test]
    async fn delete_prevents_redelivery() {
        let clock = Arc::new(SteerableClock::new());
        let broker = MemoryQueueBroker::new(clock.clone(), 5);
        let task_id = Uuid::new_v4();
        broker.enqueue(task_id, 0, Duration::from_millis(10)).await.unwrap();

        let received = broker.receive(10, Duration::ZERO).await.unwrap();
        broker.delete(&received[0].receipt).await.unwrap();

        clock.advance(Duration::from_millis(20));
        let after = broker.receive(10, Duration::ZERO).await.unwrap();
        assert!(after.is_empty());
    }
}
