//! C8 Queue Broker (spec §4.8): durable message-level handoff between the
//! Assignment Engine and agent delivery, abstracted so production runs
//! against Redis Streams and tests run against an in-memory, steerable-clock
//! implementation.

pub mod dlq;
pub mod memory;
pub mod redis_broker;

pub use dlq::spawn_dead_letter_drainer;
pub use memory::MemoryQueueBroker;
pub use redis_broker::RedisQueueBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::CoreResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub receipt: String,
    pub task_id: Uuid,
    pub priority: u8,
    pub receive_count: u32,
}

#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// `Enqueue(task_id, priority, visibility_timeout)` (spec §4.8).
    async fn enqueue(&self, task_id: Uuid, priority: u8, visibility_timeout: Duration) -> CoreResult<String>;

    /// Long-poll `Receive(max_messages, wait_time)`.
    async fn receive(&self, max_messages: u32, wait_time: Duration) -> CoreResult<Vec<QueueMessage>>;

    async fn delete(&self, receipt: &str) -> CoreResult<()>;

    async fn change_message_visibility(&self, receipt: &str, timeout: Duration) -> CoreResult<()>;

    /// Messages moved to the dead-letter target after `max_receive_count`
    /// deliveries without a `Delete` (spec §4.8).
    async fn drain_dead_letters(&self) -> CoreResult<Vec<QueueMessage>>;
}

pub type SharedQueueBroker = Arc<dyn QueueBroker>;
