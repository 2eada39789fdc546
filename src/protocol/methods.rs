//! Method body payloads (spec §4.3 method catalog). Bodies are UTF-8 JSON
//! inside the frame payload (spec §6).

use serde::{Deserialize, Serialize};

use crate::registry::agent::Capability;
pub use crate::registry::ops::CapabilityOp;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisterRequest {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: Vec<Capability>,
    pub resources: AgentResources,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResources {
    pub max_concurrent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisterResponse {
    pub agent_id: String,
    pub server_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHeartbeatRequest {
    pub status: String,
    pub metrics: HeartbeatMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatMetrics {
    pub latency_ms: Option<f64>,
    pub cost_usd: Option<f64>,
    pub current_tasks: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilityUpdateRequest {
    pub op: CapabilityOp,
    pub capability: Capability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentShutdownRequest {
    pub reason: String,
    #[serde(default)]
    pub transfer_tasks: bool,
    #[serde(default)]
    pub grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignedNotification {
    pub task_id: String,
    pub task_type: String,
    pub priority: u8,
    pub deadline_ms: Option<u64>,
    pub payload: serde_json::Value,
    pub required_capabilities: Vec<crate::tasks::model::RequiredCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressRequest {
    pub task_id: String,
    pub fraction: f32,
    pub step: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteRequest {
    pub task_id: String,
    pub result: serde_json::Value,
    pub duration_ms: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailedRequest {
    pub task_id: String,
    pub error_kind: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCancelNotification {
    pub task_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<&crate::error::CoreError> for ErrorBody {
    fn from(err: &crate::error::CoreError) -> Self {
        ErrorBody {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}
