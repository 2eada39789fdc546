//! Dead-letter drainer (spec §4.8: "after `max_attempts` deliveries without
//! `Delete`, the message moves to a dead-letter queue and the Task
//! transitions to `Failed(ExhaustedRetries)`"). Same tick-and-check shape as
//! `registry::sweeper`, consuming `QueueBroker::drain_dead_letters` instead
//! of scanning agent heartbeats.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::SharedQueueBroker;
use crate::tasks::{SharedTaskStore, TaskStatus};

/// Spawns the drain loop; cancelled via `token`.
pub fn spawn_dead_letter_drainer(
    queue: SharedQueueBroker,
    task_store: SharedTaskStore,
    poll_interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("dead-letter drainer shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    drain_once(&queue, &task_store).await;
                }
            }
        }
    })
}

async fn drain_once(queue: &SharedQueueBroker, task_store: &SharedTaskStore) {
    let dead = match queue.drain_dead_letters().await {
        Ok(messages) => messages,
        Err(err) => {
            warn!(%err, "failed to drain dead-letter queue");
            return;
        }
    };

    for message in dead {
        let task = match task_store.get_any(message.task_id).await {
            Ok(task) => task,
            Err(err) => {
                warn!(task_id = %message.task_id, %err, "dead-lettered message referenced an unknown task");
                continue;
            }
        };

        if task.status.is_terminal() {
            continue;
        }

        let result = task_store
            .transition(
                &task.tenant_id,
                task.task_id,
                TaskStatus::Failed {
                    reason: "exhausted delivery attempts".into(),
                    retryable: false,
                },
                "dead-lettered after exhausting delivery attempts",
            )
            .await;

        if let Err(err) = result {
            warn!(task_id = %message.task_id, %err, "failed to finalize dead-lettered task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteerableClock;
    use crate::queue::{MemoryQueueBroker, QueueBroker};
    use crate::tasks::{InMemoryTaskStore, NewTask, TaskStore};
    use std::sync::Arc;

    fn params(tenant: &str) -> NewTask {
        NewTask {
            tenant_id: tenant.into(),
            requester_id: "r".into(),
            session_id: None,
            task_type: "code_review".into(),
            priority: 1,
            payload: serde_json::json!({}),
            deadline: None,
            required_capabilities: vec![],
            cost_budget_usd: 1.0,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn finalizes_task_whose_message_exhausted_delivery() {
        let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(SteerableClock::new());
        let queue: SharedQueueBroker = Arc::new(MemoryQueueBroker::new(clock.clone(), 2));

        let outcome = task_store.submit(params("tenant-a"), chrono::Duration::seconds(3600)).await.unwrap();
        queue.enqueue(outcome.task.task_id, 1, Duration::from_millis(1)).await.unwrap();

        for _ in 0..3 {
            queue.receive(8, Duration::ZERO).await.unwrap();
            clock.advance(Duration::from_millis(2));
        }

        drain_once(&queue, &task_store).await;

        let reloaded = task_store.get_any(outcome.task.task_id).await.unwrap();
        assert!(matches!(reloaded.status, TaskStatus::Failed { retryable: false, .. }));
    }

    #[tokio::test]
    async fn leaves_already_terminal_tasks_alone() {
        let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(SteerableClock::new());
        let queue: SharedQueueBroker = Arc::new(MemoryQueueBroker::new(clock.clone(), 2));

        let outcome = task_store.submit(params("tenant-a"), chrono::Duration::seconds(3600)).await.unwrap();
        task_store
            .transition("tenant-a", outcome.task.task_id, TaskStatus::Cancelled { reason: "requester cancelled".into() }, "cancelled")
            .await
            .unwrap();

        queue.enqueue(outcome.task.task_id, 1, Duration::from_millis(1)).await.unwrap();
        for _ in 0..3 {
            queue.receive(8, Duration::ZERO).await.unwrap();
            clock.advance(Duration::from_millis(2));
        }

        drain_once(&queue, &task_store).await;

        let reloaded = task_store.get_any(outcome.task.task_id).await.unwrap();
        assert!(matches!(reloaded.status, TaskStatus::Cancelled { .. }));
    }
}
