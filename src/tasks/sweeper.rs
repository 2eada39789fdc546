//! Deadline-expiry sweeper (spec §4.5 "background scanner transitions
//! Pending/Assigned tasks past `deadline` to Expired; releases any reserved
//! slot", GLOSSARY Sweeper). Same tick-and-check shape as
//! `registry::sweeper`, applied to task deadlines instead of agent
//! heartbeats.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{SharedTaskStore, TaskStatus};
use crate::registry::AgentRegistry;

/// Spawns the sweep loop; cancelled via `token`.
pub fn spawn_deadline_sweeper(
    task_store: SharedTaskStore,
    registry: AgentRegistry,
    poll_interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("deadline sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    sweep_once(&task_store, &registry).await;
                }
            }
        }
    })
}

async fn sweep_once(task_store: &SharedTaskStore, registry: &AgentRegistry) {
    let expirable = match task_store.list_expirable(Utc::now()).await {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(%err, "failed to list expirable tasks");
            return;
        }
    };

    for task in expirable {
        let reserved_agent = match task.status {
            TaskStatus::Assigned => task.assignment.agent_id.clone(),
            _ => None,
        };

        match task_store
            .transition(&task.tenant_id, task.task_id, TaskStatus::Expired, "deadline passed")
            .await
        {
            Ok(_) => {
                if let Some(agent_id) = reserved_agent {
                    registry.release_slot(&task.tenant_id, &agent_id, false);
                }
            }
            Err(err) => warn!(task_id = %task.task_id, %err, "failed to expire task past deadline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteerableClock;
    use crate::registry::{Capability, RegisterParams};
    use crate::tasks::{InMemoryTaskStore, NewTask, TaskStore};
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn expired_params(tenant: &str) -> NewTask {
        NewTask {
            tenant_id: tenant.into(),
            requester_id: "r".into(),
            session_id: None,
            task_type: "code_review".into(),
            priority: 1,
            payload: serde_json::json!({}),
            deadline: Some(Utc::now() - ChronoDuration::seconds(1)),
            required_capabilities: vec![],
            cost_budget_usd: 1.0,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn expires_pending_task_past_deadline() {
        let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let registry = AgentRegistry::new(Arc::new(SteerableClock::new()));

        let outcome = task_store
            .submit(expired_params("tenant-a"), ChronoDuration::seconds(3600))
            .await
            .unwrap();

        sweep_once(&task_store, &registry).await;

        let reloaded = task_store.get_any(outcome.task.task_id).await.unwrap();
        assert!(matches!(reloaded.status, TaskStatus::Expired));
    }

    #[tokio::test]
    async fn expires_assigned_task_and_releases_slot() {
        let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let registry = AgentRegistry::new(Arc::new(SteerableClock::new()));
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
        assert!(registry.reserve_slot("tenant-a", "agent-1"));

        let outcome = task_store
            .submit(expired_params("tenant-a"), ChronoDuration::seconds(3600))
            .await
            .unwrap();
        task_store
            .record_assignment("tenant-a", outcome.task.task_id, "agent-1".into(), Utc::now() + ChronoDuration::seconds(60))
            .await
            .unwrap();

        sweep_once(&task_store, &registry).await;

        let reloaded = task_store.get_any(outcome.task.task_id).await.unwrap();
        assert!(matches!(reloaded.status, TaskStatus::Expired));
        assert!(registry.reserve_slot("tenant-a", "agent-1"), "slot should have been released by the sweep");
    }

    #[tokio::test]
    async fn leaves_tasks_without_a_deadline_alone() {
        let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let registry = AgentRegistry::new(Arc::new(SteerableClock::new()));

        let mut params = expired_params("tenant-a");
        params.deadline = None;
        let outcome = task_store.submit(params, ChronoDuration::seconds(3600)).await.unwrap();

        sweep_once(&task_store, &registry).await;

        let reloaded = task_store.get_any(outcome.task.task_id).await.unwrap();
        assert!(matches!(reloaded.status, TaskStatus::Pending));
    }
}
