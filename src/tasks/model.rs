//! Task data model and status state machine (spec §3 "Task", §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredCapability {
    pub name: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
}

fn default_confidence_floor() -> f32 {
    0.0
}

/// spec §4.5: `Pending -> Assigned -> InProgress -> {Completed, Failed}`,
/// with `Expired`, `Rejected`, `Cancelled` as additional terminal/entry
/// states. Variants carry the detail the transition needs to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    /// `retryable=false`, or `retryable=true` after `max_attempts` exhausted.
    Failed { reason: String, retryable: bool },
    /// Deadline passed before the task started.
    Expired,
    Rejected { reason: RejectReason },
    Cancelled { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    BudgetExceeded,
    NoCapableAgent,
    Validation,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed { retryable: false, .. }
                | TaskStatus::Expired
                | TaskStatus::Rejected { .. }
                | TaskStatus::Cancelled { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed { .. } => "failed",
            TaskStatus::Expired => "expired",
            TaskStatus::Rejected { .. } => "rejected",
            TaskStatus::Cancelled { .. } => "cancelled",
        }
    }

    /// spec invariant 6: only the edges drawn in §4.5 are legal. `Pending`
    /// can expire directly (a task never picked up before its deadline) and
    /// can dead-letter directly (exhausted queue redeliveries while still
    /// unassigned) without passing through `Assigned` first.
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Rejected { .. })
                | (Pending, Cancelled { .. })
                | (Pending, Expired)
                | (Pending, Failed { .. })
                | (Assigned, InProgress)
                | (Assigned, Expired)
                | (Assigned, Failed { .. })
                | (Assigned, Cancelled { .. })
                | (InProgress, Completed)
                | (InProgress, Failed { .. })
                | (InProgress, Cancelled { .. })
                | (Failed { retryable: true, .. }, Pending)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub agent_id: Option<String>,
    pub attempt: u32,
    pub assigned_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Default for AssignmentRecord {
    fn default() -> Self {
        Self {
            agent_id: None,
            attempt: 0,
            assigned_at: None,
            lease_expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub tenant_id: String,
    pub requester_id: String,
    /// The requester session this task was submitted on, if any is still
    /// attached (spec §4.7: budget accounting is per-session, not
    /// per-executing-agent).
    pub session_id: Option<String>,
    pub task_type: String,
    pub priority: u8,
    pub payload: serde_json::Value,
    pub deadline: Option<DateTime<Utc>>,
    pub required_capabilities: Vec<RequiredCapability>,
    pub cost_budget_usd: f64,
    pub idempotency_key: Option<String>,
    pub status: TaskStatus,
    pub assignment: AssignmentRecord,
    pub result: Option<serde_json::Value>,
    pub observed_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct NewTask {
    pub tenant_id: String,
    pub requester_id: String,
    pub session_id: Option<String>,
    pub task_type: String,
    pub priority: u8,
    pub payload: serde_json::Value,
    pub deadline: Option<DateTime<Utc>>,
    pub required_capabilities: Vec<RequiredCapability>,
    pub cost_budget_usd: f64,
    pub idempotency_key: Option<String>,
}

impl Task {
    pub fn new(params: NewTask, now: DateTime<Utc>) -> Self {
        Task {
            task_id: Uuid::new_v4(),
            tenant_id: params.tenant_id,
            requester_id: params.requester_id,
            session_id: params.session_id,
            task_type: params.task_type,
            priority: params.priority.min(3),
            payload: params.payload,
            deadline: params.deadline,
            required_capabilities: params.required_capabilities,
            cost_budget_usd: params.cost_budget_usd,
            idempotency_key: params.idempotency_key,
            status: TaskStatus::Pending,
            assignment: AssignmentRecord::default(),
            result: None,
            observed_cost_usd: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now > d).unwrap_or(false)
    }
}
