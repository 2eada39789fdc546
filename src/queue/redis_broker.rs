//! Redis Streams-backed [`QueueBroker`], grounded in the teacher's
//! `bin/router.rs` Redis usage (`Client`, `AsyncCommands`, `xread`) but
//! upgraded to consumer groups so visibility timeout maps onto Redis'
//! pending-entries-list (PEL) idle time via `XAUTOCLAIM`, and built on the
//! `connection-manager` feature for automatic reconnection.
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use super::{QueueBroker, QueueMessage};
use crate::error::{CoreError, CoreResult};

const CONSUMER_GROUP: &str = "agentmesh-workers";
const CONSUMER_NAME: &str = "agentmesh-consumer";

pub struct RedisQueueBroker {
    conn: ConnectionManager,
    stream_key: String,
    dead_letter_key: String,
    max_receive_count: u32,
}

impl RedisQueueBroker {
    pub async fn connect(redis_url: &str, stream_key: &str, max_receive_count: u32) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        let broker = Self {
            conn,
            stream_key: stream_key.to_string(),
            dead_letter_key: format!("{stream_key}:dlq"),
            max_receive_count,
        };
        broker.ensure_group().await?;
        Ok(broker)
    }

    async fn ensure_group(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream_key, CONSUMER_GROUP, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn map_err(err: redis::RedisError) -> CoreError {
        CoreError::Retryable(err.to_string())
    }
}

#[async_trait]
impl QueueBroker for RedisQueueBroker {
    async fn enqueue(&self, task_id: Uuid, priority: u8, _visibility_timeout: Duration) -> CoreResult<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(
                &self.stream_key,
                "*",
                &[
                    ("task_id", task_id.to_string()),
                    ("priority", priority.to_string()),
                ],
            )
            .await
            .map_err(Self::map_err)?;
        Ok(id)
    }

    async fn receive(&self, max_messages: u32, wait_time: Duration) -> CoreResult<Vec<QueueMessage>> {
        let mut conn = self.conn.clone();

        let opts = redis::streams::StreamReadOptions::default()
            .group(CONSUMER_GROUP, CONSUMER_NAME)
            .count(max_messages as usize)
            .block(wait_time.as_millis() as usize);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(Self::map_err)?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let task_id = entry
                    .map
                    .get("task_id")
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                    .and_then(|s| Uuid::parse_str(&s).ok());
                let priority = entry
                    .map
                    .get("priority")
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                    .and_then(|s| s.parse::<u8>().ok())
                    .unwrap_or(0);

                let Some(task_id) = task_id else { continue };

                let pending: redis::streams::StreamPendingCountReply = conn
                    .xpending_consumer_count(&self.stream_key, CONSUMER_GROUP, "-", "+", 1, CONSUMER_NAME)
                    .await
                    .unwrap_or_default();
                let receive_count = pending
                    .ids
                    .iter()
                    .find(|p| p.id == entry.id)
                    .map(|p| p.times_delivered as u32)
                    .unwrap_or(1);

                if receive_count > self.max_receive_count {
                    let _: redis::RedisResult<i64> = conn
                        .xadd(
                            &self.dead_letter_key,
                            "*",
                            &[("task_id", task_id.to_string()), ("priority", priority.to_string())],
                        )
                        .await;
                    let _: redis::RedisResult<i64> =
                        conn.xack(&self.stream_key, CONSUMER_GROUP, &[&entry.id]).await;
                    continue;
                }

                messages.push(QueueMessage {
                    receipt: entry.id,
                    task_id,
                    priority,
                    receive_count,
                });
            }
        }

        Ok(messages)
    }

    async fn delete(&self, receipt: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream_key, CONSUMER_GROUP, &[receipt])
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn change_message_visibility(&self, receipt: &str, timeout: Duration) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: redis::streams::StreamClaimReply = conn
            .xclaim(
                &self.stream_key,
                CONSUMER_GROUP,
                CONSUMER_NAME,
                timeout.as_millis() as usize,
                &[receipt],
            )
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn drain_dead_letters(&self) -> CoreResult<Vec<QueueMessage>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrange_all(&self.dead_letter_key)
            .await
            .map_err(Self::map_err)?;

        let mut messages = Vec::new();
        for entry in reply.ids {
            let task_id = entry
                .map
                .get("task_id")
                .and_then(|v| redis::from_redis_value::<String>(v).ok())
                .and_then(|s| Uuid::parse_str(&s).ok());
            let priority = entry
                .map
                .get("priority")
                .and_then(|v| redis::from_redis_value::<String>(v).ok())
                .and_then(|s| s.parse::<u8>().ok())
                .unwrap_or(0);
            if let Some(task_id) = task_id {
                messages.push(QueueMessage {
                    receipt: entry.id.clone(),
                    task_id,
                    priority,
                    receive_count: self.max_receive_count + 1,
                });
            }
        }

        if !messages.is_empty() {
            let _: redis::RedisResult<i64> = conn.del(&self.dead_letter_key).await;
        }
        Ok(messages)
    }
}
