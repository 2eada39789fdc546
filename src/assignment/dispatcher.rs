//! Drives tasks from the Queue Broker through the Assignment Engine to
//! agent delivery (spec §4.1 control flow: "... C6 selects an agent → C8
//! enqueues an assignment → C2 pushes it to the chosen agent..."). This is
//! the piece `router::task_assigned_frame` was built for but doesn't itself
//! run: the loop that actually calls it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::assignment::{AssignmentEngine, AssignmentFailure};
use crate::connection::ConnectionManager;
use crate::cost::CostGate;
use crate::error::{CoreError, CoreResult};
use crate::queue::{QueueMessage, SharedQueueBroker};
use crate::registry::AgentRegistry;
use crate::router::task_assigned_frame;
use crate::tasks::{NewTask, SharedTaskStore, Task, TaskStatus};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_batch: u32,
    pub poll_wait: Duration,
    pub assignment_lease: Duration,
    pub no_agent_retry_after: Duration,
    pub idempotency_ttl: ChronoDuration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_batch: 16,
            poll_wait: Duration::from_millis(500),
            assignment_lease: Duration::from_secs(300),
            no_agent_retry_after: Duration::from_millis(500),
            idempotency_ttl: ChronoDuration::seconds(3600),
        }
    }
}

/// spec §4.1: "C7 budget-checks → C5 persists in `Pending` → ... → C8
/// enqueues". A budget rejection never reaches the Task Store at all.
pub async fn submit_task(
    task_store: &SharedTaskStore,
    cost_gate: &CostGate,
    queue: &SharedQueueBroker,
    config: &DispatcherConfig,
    params: NewTask,
) -> CoreResult<Task> {
    let session_scope = params.session_id.clone().unwrap_or_else(|| params.tenant_id.clone());
    cost_gate.pre_check(&session_scope, &params.tenant_id, params.cost_budget_usd, params.cost_budget_usd)?;

    let outcome = task_store.submit(params, config.idempotency_ttl).await?;
    if outcome.is_new && matches!(outcome.task.status, TaskStatus::Pending) {
        queue
            .enqueue(outcome.task.task_id, outcome.task.priority, config.assignment_lease)
            .await?;
    }
    Ok(outcome.task)
}

/// Background loop: long-poll the Queue Broker, assign via the Assignment
/// Engine, push `task.assigned` over the winning agent's connection.
/// Spawned once by [`crate::platform::Platform::start`].
pub fn spawn_assignment_loop(
    queue: SharedQueueBroker,
    task_store: SharedTaskStore,
    engine: Arc<AssignmentEngine>,
    registry: AgentRegistry,
    connections: Arc<ConnectionManager>,
    config: DispatcherConfig,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = queue.receive(config.poll_batch, config.poll_wait) => {
                    match received {
                        Ok(messages) => {
                            for message in messages {
                                process_message(&queue, &task_store, &engine, &registry, &connections, &config, message).await;
                            }
                        }
                        Err(err) => warn!(%err, "queue receive failed"),
                    }
                }
            }
        }
    })
}

async fn process_message(
    queue: &SharedQueueBroker,
    task_store: &SharedTaskStore,
    engine: &Arc<AssignmentEngine>,
    registry: &AgentRegistry,
    connections: &Arc<ConnectionManager>,
    config: &DispatcherConfig,
    message: QueueMessage,
) {
    let task = match task_store.get_any(message.task_id).await {
        Ok(task) => task,
        Err(err) => {
            warn!(task_id = %message.task_id, %err, "dropping queue message for unknown task");
            let _ = queue.delete(&message.receipt).await;
            return;
        }
    };

    if !matches!(task.status, TaskStatus::Pending) {
        // Already assigned, cancelled or expired by another path; a
        // redelivery race lost to whichever receiver got there first.
        let _ = queue.delete(&message.receipt).await;
        return;
    }

    match engine.assign(&task) {
        Ok((_, agent_id)) => assign_and_dispatch(queue, task_store, registry, connections, config, message, task, agent_id).await,
        Err(AssignmentFailure::NoCapableAgent) | Err(AssignmentFailure::ExhaustedReselect) => {
            debug!(task_id = %task.task_id, "no capable agent available, retrying shortly");
            let _ = queue.change_message_visibility(&message.receipt, config.no_agent_retry_after).await;
        }
    }
}

async fn assign_and_dispatch(
    queue: &SharedQueueBroker,
    task_store: &SharedTaskStore,
    registry: &AgentRegistry,
    connections: &Arc<ConnectionManager>,
    config: &DispatcherConfig,
    message: QueueMessage,
    task: Task,
    agent_id: String,
) {
    let lease_expires_at = Utc::now()
        + ChronoDuration::from_std(config.assignment_lease).unwrap_or_else(|_| ChronoDuration::seconds(300));

    let assigned = task_store
        .record_assignment(&task.tenant_id, task.task_id, agent_id.clone(), lease_expires_at)
        .await;

    let assigned_task = match assigned {
        Ok(assigned_task) => assigned_task,
        Err(err) => {
            warn!(task_id = %task.task_id, %err, "record_assignment failed, releasing reserved slot");
            registry.release_slot(&task.tenant_id, &agent_id, false);
            let _ = queue.change_message_visibility(&message.receipt, config.no_agent_retry_after).await;
            return;
        }
    };

    match dispatch_to_agent(registry, connections, &assigned_task, &agent_id).await {
        Ok(()) => {
            let _ = queue.delete(&message.receipt).await;
        }
        Err(err) => {
            warn!(task_id = %task.task_id, agent_id = %agent_id, %err, "failed to deliver task.assigned, reverting to pending");
            registry.release_slot(&task.tenant_id, &agent_id, false);
            // `Assigned` has no direct edge back to `Pending` (spec §4.5
            // invariant 6); a delivery failure is recorded as a retryable
            // `Failed` first, which does carry that edge.
            let failed = task_store
                .transition(
                    &task.tenant_id,
                    task.task_id,
                    TaskStatus::Failed { reason: err.to_string(), retryable: true },
                    "delivery failed",
                )
                .await;
            if failed.is_ok() {
                let reverted = task_store
                    .transition(&task.tenant_id, task.task_id, TaskStatus::Pending, "requeued after delivery failure")
                    .await;
                if reverted.is_err() {
                    warn!(task_id = %task.task_id, "could not revert task to pending after delivery failure");
                }
            } else {
                warn!(task_id = %task.task_id, "could not mark task failed after delivery failure");
            }
            let _ = queue.change_message_visibility(&message.receipt, config.no_agent_retry_after).await;
        }
    }
}

async fn dispatch_to_agent(
    registry: &AgentRegistry,
    connections: &Arc<ConnectionManager>,
    task: &Task,
    agent_id: &str,
) -> CoreResult<()> {
    let connection_id = registry
        .get(&task.tenant_id, agent_id)
        .and_then(|handle| handle.snapshot().connection_id)
        .ok_or_else(|| CoreError::ConflictState("assigned agent has no live connection".into()))?;
    let connection = connections
        .get(connection_id)
        .ok_or_else(|| CoreError::ConflictState("assigned agent connection not found".into()))?;

    let frame = task_assigned_frame(0, task)?;
    let delivered = connection.send(frame, task.priority >= 3, Duration::from_secs(5)).await;
    if !delivered {
        return Err(CoreError::Retryable("outbound send to agent did not complete".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::{AssignmentEngine, CapabilityMatch};
    use crate::clock::SteerableClock;
    use crate::connection::{ConnectionManager, ConnectionManagerConfig};
    use crate::cost::{CostGate, CostGateConfig};
    use crate::queue::MemoryQueueBroker;
    use crate::registry::{AgentRegistry, Capability, RegisterParams};
    use crate::tasks::InMemoryTaskStore;
    use std::sync::Arc as StdArc;
    use tokio::sync::mpsc;

    fn permissive_cost_gate() -> CostGate {
        CostGate::new(CostGateConfig {
            warn_ratio: 0.8,
            crit_ratio: 0.95,
            default_session_limit_usd: 1000.0,
            default_tenant_daily_limit_usd: 1000.0,
        })
    }

    fn new_params(tenant: &str) -> NewTask {
        NewTask {
            tenant_id: tenant.into(),
            requester_id: "r".into(),
            session_id: None,
            task_type: "code_review".into(),
            priority: 1,
            payload: serde_json::json!({}),
            deadline: None,
            required_capabilities: vec![],
            cost_budget_usd: 5.0,
            idempotency_key: None,
        }
    }

    fn dispatcher_config() -> DispatcherConfig {
        DispatcherConfig {
            poll_batch: 8,
            poll_wait: Duration::from_millis(10),
            assignment_lease: Duration::from_secs(60),
            no_agent_retry_after: Duration::from_millis(1),
            idempotency_ttl: ChronoDuration::seconds(3600),
        }
    }

    fn connection_manager() -> StdArc<ConnectionManager> {
        let (tx, _rx) = mpsc::channel(16);
        ConnectionManager::new(ConnectionManagerConfig::default(), tx)
    }

    #[tokio::test]
    async fn submit_task_enqueues_pending_task() {
        let task_store: SharedTaskStore = StdArc::new(InMemoryTaskStore::default());
        let cost_gate = permissive_cost_gate();
        let clock = StdArc::new(SteerableClock::new());
        let queue: SharedQueueBroker = StdArc::new(MemoryQueueBroker::new(clock, 3));
        let config = dispatcher_config();

        let task = submit_task(&task_store, &cost_gate, &queue, &config, new_params("tenant-a")).await.unwrap();
        assert!(matches!(task.status, TaskStatus::Pending));

        let messages = queue.receive(8, Duration::from_millis(1)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].task_id, task.task_id);
    }

    #[tokio::test]
    async fn submit_task_rejects_over_budget_without_persisting() {
        let task_store: SharedTaskStore = StdArc::new(InMemoryTaskStore::default());
        let cost_gate = CostGate::new(CostGateConfig {
            warn_ratio: 0.8,
            crit_ratio: 0.95,
            default_session_limit_usd: 1.0,
            default_tenant_daily_limit_usd: 1.0,
        });
        let clock = StdArc::new(SteerableClock::new());
        let queue: SharedQueueBroker = StdArc::new(MemoryQueueBroker::new(clock, 3));
        let config = dispatcher_config();

        let mut params = new_params("tenant-a");
        params.cost_budget_usd = 50.0;

        let result = submit_task(&task_store, &cost_gate, &queue, &config, params).await;
        assert!(result.is_err());

        let messages = queue.receive(8, Duration::from_millis(1)).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn process_message_drops_unknown_task() {
        let task_store: SharedTaskStore = StdArc::new(InMemoryTaskStore::default());
        let clock = StdArc::new(SteerableClock::new());
        let queue: SharedQueueBroker = StdArc::new(MemoryQueueBroker::new(clock.clone(), 3));
        let registry = AgentRegistry::new(clock);
        let engine = StdArc::new(AssignmentEngine::new(registry.clone(), "capability_match"));
        let connections = connection_manager();
        let config = dispatcher_config();

        let receipt = queue.enqueue(Uuid::new_v4(), 1, Duration::from_secs(60)).await.unwrap();
        let message = queue.receive(8, Duration::from_millis(1)).await.unwrap().remove(0);
        assert_eq!(message.receipt, receipt);

        process_message(&queue, &task_store, &engine, &registry, &connections, &config, message).await;

        assert!(queue.receive(8, Duration::from_millis(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn process_message_requeues_when_no_capable_agent() {
        let task_store: SharedTaskStore = StdArc::new(InMemoryTaskStore::default());
        let steerable = StdArc::new(SteerableClock::new());
        let clock: crate::clock::SharedClock = steerable.clone();
        let queue: SharedQueueBroker = StdArc::new(MemoryQueueBroker::new(clock.clone(), 3));
        let registry = AgentRegistry::new(clock);
        let mut engine = AssignmentEngine::new(registry.clone(), "capability_match");
        engine.register_strategy("capability_match", StdArc::new(CapabilityMatch::new(0.1)));
        let engine = StdArc::new(engine);
        let connections = connection_manager();
        let config = dispatcher_config();

        let cost_gate = permissive_cost_gate();
        let task = submit_task(&task_store, &cost_gate, &queue, &config, new_params("tenant-a")).await.unwrap();

        let message = queue.receive(8, Duration::from_millis(1)).await.unwrap().remove(0);
        process_message(&queue, &task_store, &engine, &registry, &connections, &config, message).await;

        let reloaded = task_store.get_any(task.task_id).await.unwrap();
        assert!(matches!(reloaded.status, TaskStatus::Pending));

        steerable.advance(config.no_agent_retry_after + Duration::from_millis(1));
        let redelivered = queue.receive(8, Duration::from_millis(1)).await.unwrap();
        assert_eq!(redelivered.len(), 1);
    }

    #[tokio::test]
    async fn process_message_reverts_to_pending_when_agent_has_no_connection() {
        let task_store: SharedTaskStore = StdArc::new(InMemoryTaskStore::default());
        let steerable = StdArc::new(SteerableClock::new());
        let clock: crate::clock::SharedClock = steerable.clone();
        let queue: SharedQueueBroker = StdArc::new(MemoryQueueBroker::new(clock.clone(), 3));
        let registry = AgentRegistry::new(clock);
        registry.register(RegisterParams {
            tenant_id: "tenant-a".into(),
            agent_id: "agent-1".into(),
            agent_type: "worker".into(),
            capabilities: vec![Capability {
                name: "code_review".into(),
                confidence: 0.9,
                specialties: vec![],
                languages: vec![],
                model_id: None,
            }],
            max_concurrent: 1,
        });
        let mut engine = AssignmentEngine::new(registry.clone(), "capability_match");
        engine.register_strategy("capability_match", StdArc::new(CapabilityMatch::new(0.1)));
        let engine = StdArc::new(engine);
        let connections = connection_manager();
        let config = dispatcher_config();

        let cost_gate = permissive_cost_gate();
        let task = submit_task(&task_store, &cost_gate, &queue, &config, new_params("tenant-a")).await.unwrap();

        let message = queue.receive(8, Duration::from_millis(1)).await.unwrap().remove(0);
        process_message(&queue, &task_store, &engine, &registry, &connections, &config, message).await;

        // The agent has no live connection registered in `connections`, so
        // delivery fails and the task must come back to `Pending` rather
        // than sit stranded in `Assigned` with nothing left to redeliver it.
        let reloaded = task_store.get_any(task.task_id).await.unwrap();
        assert!(matches!(reloaded.status, TaskStatus::Pending));

        steerable.advance(config.no_agent_retry_after + Duration::from_millis(1));
        let redelivered = queue.receive(8, Duration::from_millis(1)).await.unwrap();
        assert_eq!(redelivered.len(), 1);
    }
}
