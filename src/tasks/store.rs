//! Task Store (spec §3 "Task Store External Contract", §4.5).
//!
//! The Task Store is the sole owner of Task records (spec §3 Lifecycle &
//! Ownership); every other component holds only a `task_id`. Transitions are
//! event-sourced into `task_events` so a crash can recover state by replaying
//! the log, mirroring the teacher's append-only `AuditLogger` rather than
//! mutating rows with no trail.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::model::{AssignmentRecord, NewTask, RejectReason, Task, TaskStatus};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub ts: DateTime<Utc>,
    pub from_status: String,
    pub to_status: String,
    pub detail: String,
}

/// Outcome of [`TaskStore::submit`]: whether this call created a fresh
/// Task or returned one matched by idempotency key (spec invariant 4, P4).
pub struct SubmitOutcome {
    pub task: Task,
    pub is_new: bool,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn submit(&self, params: NewTask, idempotency_ttl: ChronoDuration) -> CoreResult<SubmitOutcome>;

    async fn get(&self, tenant_id: &str, task_id: Uuid) -> CoreResult<Task>;

    /// Tenant-unscoped lookup for internal callers that only hold a
    /// `task_id` (the Queue Broker's delivery envelope carries no
    /// `tenant_id`, spec §4.8). Never exposed over the wire protocol.
    async fn get_any(&self, task_id: Uuid) -> CoreResult<Task>;

    /// Validates the transition against [`TaskStatus::can_transition_to`]
    /// and appends a `task_events` row atomically with the status write.
    async fn transition(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        next: TaskStatus,
        detail: &str,
    ) -> CoreResult<Task>;

    async fn record_assignment(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        agent_id: String,
        lease_expires_at: DateTime<Utc>,
    ) -> CoreResult<Task>;

    async fn record_result(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        result: serde_json::Value,
        cost_usd: f64,
    ) -> CoreResult<Task>;

    /// Pending/Assigned tasks whose deadline has passed `now` (spec §4.5
    /// "Expired: background scanner").
    async fn list_expirable(&self, now: DateTime<Utc>) -> CoreResult<Vec<Task>>;

    async fn events(&self, task_id: Uuid) -> CoreResult<Vec<TaskEvent>>;
}

/// In-memory backing, used in unit/integration tests and as a local dev
/// fallback in place of the Postgres-backed production store.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
    idempotency: Mutex<HashMap<(String, String), Uuid>>,
    events: Mutex<Vec<TaskEvent>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn append_event(&self, task_id: Uuid, from: &TaskStatus, to: &TaskStatus, detail: &str, now: DateTime<Utc>) {
        self.events.lock().push(TaskEvent {
            task_id,
            ts: now,
            from_status: from.label().to_string(),
            to_status: to.label().to_string(),
            detail: detail.to_string(),
        });
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn submit(&self, params: NewTask, idempotency_ttl: ChronoDuration) -> CoreResult<SubmitOutcome> {
        let now = Utc::now();

        if let Some(key) = params.idempotency_key.clone() {
            let index_key = (params.tenant_id.clone(), key);
            let existing_id = self.idempotency.lock().get(&index_key).copied();
            if let Some(task_id) = existing_id {
                let tasks = self.tasks.lock();
                let existing = tasks.get(&task_id).expect("idempotency index dangling").clone();
                let is_terminal = existing.status.is_terminal();
                let within_ttl = now - existing.created_at < idempotency_ttl;
                if !is_terminal || within_ttl {
                    return Ok(SubmitOutcome { task: existing, is_new: false });
                }
            }
        }

        let task = Task::new(params, now);
        if let Some(key) = task.idempotency_key.clone() {
            self.idempotency
                .lock()
                .insert((task.tenant_id.clone(), key), task.task_id);
        }
        self.tasks.lock().insert(task.task_id, task.clone());
        self.append_event(task.task_id, &TaskStatus::Pending, &task.status, "submitted", now);
        Ok(SubmitOutcome { task, is_new: true })
    }

    async fn get(&self, tenant_id: &str, task_id: Uuid) -> CoreResult<Task> {
        let tasks = self.tasks.lock();
        tasks
            .get(&task_id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| CoreError::InvalidParams {
                field: "task_id".into(),
                reason: "unknown task".into(),
            })
    }

    async fn get_any(&self, task_id: Uuid) -> CoreResult<Task> {
        self.tasks
            .lock()
            .get(&task_id)
            .cloned()
            .ok_or_else(|| CoreError::InvalidParams {
                field: "task_id".into(),
                reason: "unknown task".into(),
            })
    }

    async fn transition(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        next: TaskStatus,
        detail: &str,
    ) -> CoreResult<Task> {
        let now = Utc::now();
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(&task_id)
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::InvalidParams {
                field: "task_id".into(),
                reason: "unknown task".into(),
            })?;

        if !task.status.can_transition_to(&next) {
            return Err(CoreError::ConflictState(format!(
                "{} -> {}",
                task.status.label(),
                next.label()
            )));
        }

        let from = task.status.clone();
        if matches!(next, TaskStatus::Failed { retryable: true, .. }) {
            task.assignment.attempt += 1;
        }
        task.status = next.clone();
        task.updated_at = now;
        let snapshot = task.clone();
        drop(tasks);
        self.append_event(task_id, &from, &next, detail, now);
        Ok(snapshot)
    }

    async fn record_assignment(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        agent_id: String,
        lease_expires_at: DateTime<Utc>,
    ) -> CoreResult<Task> {
        let now = Utc::now();
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(&task_id)
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::InvalidParams {
                field: "task_id".into(),
                reason: "unknown task".into(),
            })?;

        if !task.status.can_transition_to(&TaskStatus::Assigned) {
            return Err(CoreError::ConflictState(format!(
                "{} -> assigned",
                task.status.label()
            )));
        }
        let from = task.status.clone();
        task.status = TaskStatus::Assigned;
        task.assignment = AssignmentRecord {
            agent_id: Some(agent_id.clone()),
            attempt: task.assignment.attempt,
            assigned_at: Some(now),
            lease_expires_at: Some(lease_expires_at),
        };
        task.updated_at = now;
        let snapshot = task.clone();
        drop(tasks);
        self.append_event(task_id, &from, &TaskStatus::Assigned, &format!("assigned to {agent_id}"), now);
        Ok(snapshot)
    }

    async fn record_result(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        result: serde_json::Value,
        cost_usd: f64,
    ) -> CoreResult<Task> {
        let now = Utc::now();
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(&task_id)
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::InvalidParams {
                field: "task_id".into(),
                reason: "unknown task".into(),
            })?;

        if !task.status.can_transition_to(&TaskStatus::Completed) {
            return Err(CoreError::ConflictState(format!(
                "{} -> completed",
                task.status.label()
            )));
        }
        let from = task.status.clone();
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.observed_cost_usd = cost_usd;
        task.updated_at = now;
        let snapshot = task.clone();
        drop(tasks);
        self.append_event(task_id, &from, &TaskStatus::Completed, "completed", now);
        Ok(snapshot)
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> CoreResult<Vec<Task>> {
        let tasks = self.tasks.lock();
        Ok(tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Assigned))
            .filter(|t| t.is_past_deadline(now))
            .cloned()
            .collect())
    }

    async fn events(&self, task_id: Uuid) -> CoreResult<Vec<TaskEvent>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }
}

pub type SharedTaskStore = Arc<dyn TaskStore>;

pub fn rejection_status(reason: RejectReason) -> TaskStatus {
    TaskStatus::Rejected { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tenant: &str, key: Option<&str>) -> NewTask {
        NewTask {
            tenant_id: tenant.into(),
            requester_id: "req-1".into(),
            session_id: None,
            task_type: "code_review".into(),
            priority: 1,
            payload: serde_json::json!({}),
            deadline: None,
            required_capabilities: vec![],
            cost_budget_usd: 1.0,
            idempotency_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn submit_is_idempotent_within_ttl() {
        let store = InMemoryTaskStore::new();
        let ttl = ChronoDuration::seconds(3600);
        let first = store.submit(sample("t1", Some("k1")), ttl).await.unwrap();
        let second = store.submit(sample("t1", Some("k1")), ttl).await.unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.task.task_id, second.task.task_id);
    }

    #[tokio::test]
    async fn legal_transition_sequence_succeeds() {
        let store = InMemoryTaskStore::new();
        let ttl = ChronoDuration::seconds(3600);
        let outcome = store.submit(sample("t1", None), ttl).await.unwrap();
        let task_id = outcome.task.task_id;

        let assigned = store
            .record_assignment("t1", task_id, "agent-1".into(), Utc::now() + ChronoDuration::seconds(300))
            .await
            .unwrap();
        assert_eq!(assigned.status.label(), "assigned");

        let in_progress = store
            .transition("t1", task_id, TaskStatus::InProgress, "first progress report")
            .await
            .unwrap();
        assert_eq!(in_progress.status.label(), "in_progress");

        let completed = store
            .record_result("t1", task_id, serde_json::json!({"ok": true}), 0.05)
            .await
            .unwrap();
        assert_eq!(completed.status.label(), "completed");
        assert_eq!(store.events(task_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = InMemoryTaskStore::new();
        let ttl = ChronoDuration::seconds(3600);
        let outcome = store.submit(sample("t1", None), ttl).await.unwrap();

        let err = store
            .transition("t1", outcome.task.task_id, TaskStatus::Completed, "skip ahead")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ConflictState(_)));
    }
}
