//! Method handler contract (spec §4.3 method catalog) and the concrete
//! handlers wiring frames to the Registry / Task Store / Assignment Engine
//! / Cost Gate.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::assignment::{backoff_with_jitter, RetryConfig};
use crate::connection::ConnectionManager;
use crate::cost::CostGate;
use crate::error::{CoreError, CoreResult};
use crate::protocol::frame::{Frame, FrameFlags, FrameType, Method};
use crate::protocol::methods::{
    AgentCapabilityUpdateRequest, AgentHeartbeatRequest, AgentRegisterRequest, AgentRegisterResponse,
    AgentShutdownRequest, Ack, TaskCompleteRequest, TaskFailedRequest, TaskProgressRequest,
};
use crate::queue::SharedQueueBroker;
use crate::registry::{AgentRegistry, AgentStatus, RegisterParams};
use crate::tasks::{SharedTaskStore, TaskStatus};

/// Shared state every handler needs; constructed once per server instance
/// and cloned (cheaply, via internal `Arc`s) into each connection's router.
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: AgentRegistry,
    pub task_store: SharedTaskStore,
    pub cost_gate: Arc<CostGate>,
    pub connections: Arc<ConnectionManager>,
    pub queue_broker: SharedQueueBroker,
    pub retry: RetryConfig,
}

#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext, connection_id: u64, frame: &Frame) -> CoreResult<Vec<u8>>;
}

fn decode_body<T: serde::de::DeserializeOwned>(frame: &Frame) -> CoreResult<T> {
    serde_json::from_slice(&frame.payload)
        .map_err(|err| CoreError::InvalidParams { field: "payload".into(), reason: err.to_string() })
}

fn encode_body<T: serde::Serialize>(body: &T) -> CoreResult<Vec<u8>> {
    serde_json::to_vec(body).map_err(|err| CoreError::Fatal(err.to_string()))
}

pub struct AgentRegisterHandler;

#[async_trait]
impl MethodHandler for AgentRegisterHandler {
    async fn handle(&self, ctx: &HandlerContext, connection_id: u64, frame: &Frame) -> CoreResult<Vec<u8>> {
        let body: AgentRegisterRequest = decode_body(frame)?;
        let connection = ctx
            .connections
            .get(connection_id)
            .ok_or_else(|| CoreError::ProtocolViolation("unknown connection".into()))?;

        let handle = ctx.registry.register(RegisterParams {
            tenant_id: connection.tenant_id.clone(),
            agent_id: body.agent_id.clone(),
            agent_type: body.agent_type,
            capabilities: body.capabilities,
            max_concurrent: body.resources.max_concurrent.max(1),
        });
        ctx.registry
            .set_connection(&connection.tenant_id, &handle.agent_id, Some(connection_id));

        encode_body(&AgentRegisterResponse {
            agent_id: body.agent_id,
            server_time_ms: chrono::Utc::now().timestamp_millis() as u64,
        })
    }
}

pub struct AgentHeartbeatHandler;

#[async_trait]
impl MethodHandler for AgentHeartbeatHandler {
    async fn handle(&self, ctx: &HandlerContext, connection_id: u64, frame: &Frame) -> CoreResult<Vec<u8>> {
        let body: AgentHeartbeatRequest = decode_body(frame)?;
        let connection = ctx
            .connections
            .get(connection_id)
            .ok_or_else(|| CoreError::ProtocolViolation("unknown connection".into()))?;
        let agent_id = connection
            .agent_id
            .clone()
            .ok_or_else(|| CoreError::ProtocolViolation("heartbeat before register".into()))?;

        ctx.registry.heartbeat(
            &connection.tenant_id,
            &agent_id,
            body.metrics.latency_ms,
            body.metrics.cost_usd,
        )?;
        encode_body(&Ack { ok: true })
    }
}

pub struct AgentCapabilityUpdateHandler;

#[async_trait]
impl MethodHandler for AgentCapabilityUpdateHandler {
    async fn handle(&self, ctx: &HandlerContext, connection_id: u64, frame: &Frame) -> CoreResult<Vec<u8>> {
        let body: AgentCapabilityUpdateRequest = decode_body(frame)?;
        let connection = ctx
            .connections
            .get(connection_id)
            .ok_or_else(|| CoreError::ProtocolViolation("unknown connection".into()))?;
        let agent_id = connection
            .agent_id
            .clone()
            .ok_or_else(|| CoreError::ProtocolViolation("capability update before register".into()))?;

        ctx.registry
            .update_capabilities(&connection.tenant_id, &agent_id, body.op, body.capability)?;
        encode_body(&Ack { ok: true })
    }
}

pub struct AgentShutdownHandler;

#[async_trait]
impl MethodHandler for AgentShutdownHandler {
    async fn handle(&self, ctx: &HandlerContext, connection_id: u64, frame: &Frame) -> CoreResult<Vec<u8>> {
        let body: AgentShutdownRequest = decode_body(frame)?;
        let connection = ctx
            .connections
            .get(connection_id)
            .ok_or_else(|| CoreError::ProtocolViolation("unknown connection".into()))?;
        if let Some(agent_id) = &connection.agent_id {
            ctx.registry
                .set_status(&connection.tenant_id, agent_id, AgentStatus::Draining);
        }
        ctx.connections
            .close_gracefully(connection_id, &body.reason)
            .await;
        encode_body(&Ack { ok: true })
    }
}

pub struct TaskProgressHandler;

#[async_trait]
impl MethodHandler for TaskProgressHandler {
    async fn handle(&self, ctx: &HandlerContext, connection_id: u64, frame: &Frame) -> CoreResult<Vec<u8>> {
        let body: TaskProgressRequest = decode_body(frame)?;
        let connection = ctx
            .connections
            .get(connection_id)
            .ok_or_else(|| CoreError::ProtocolViolation("unknown connection".into()))?;
        let task_id = uuid::Uuid::parse_str(&body.task_id)
            .map_err(|err| CoreError::InvalidParams { field: "task_id".into(), reason: err.to_string() })?;

        let task = ctx.task_store.get(&connection.tenant_id, task_id).await?;
        if matches!(task.status, TaskStatus::Assigned) {
            ctx.task_store
                .transition(&connection.tenant_id, task_id, TaskStatus::InProgress, "first progress report")
                .await?;
        }
        encode_body(&Ack { ok: true })
    }
}

pub struct TaskCompleteHandler;

#[async_trait]
impl MethodHandler for TaskCompleteHandler {
    async fn handle(&self, ctx: &HandlerContext, connection_id: u64, frame: &Frame) -> CoreResult<Vec<u8>> {
        let body: TaskCompleteRequest = decode_body(frame)?;
        let connection = ctx
            .connections
            .get(connection_id)
            .ok_or_else(|| CoreError::ProtocolViolation("unknown connection".into()))?;
        let agent_id = connection
            .agent_id
            .clone()
            .ok_or_else(|| CoreError::ProtocolViolation("task.complete before register".into()))?;
        let task_id = uuid::Uuid::parse_str(&body.task_id)
            .map_err(|err| CoreError::InvalidParams { field: "task_id".into(), reason: err.to_string() })?;

        let task = ctx
            .task_store
            .record_result(&connection.tenant_id, task_id, body.result, body.cost_usd)
            .await?;
        ctx.registry.release_slot(&connection.tenant_id, &agent_id, true);
        let session_scope = task.session_id.as_deref().unwrap_or(&connection.tenant_id);
        ctx.cost_gate.post_record(session_scope, &connection.tenant_id, body.cost_usd);
        debug_assert!(matches!(task.status, TaskStatus::Completed));
        encode_body(&Ack { ok: true })
    }
}

pub struct TaskFailedHandler;

#[async_trait]
impl MethodHandler for TaskFailedHandler {
    async fn handle(&self, ctx: &HandlerContext, connection_id: u64, frame: &Frame) -> CoreResult<Vec<u8>> {
        let body: TaskFailedRequest = decode_body(frame)?;
        let connection = ctx
            .connections
            .get(connection_id)
            .ok_or_else(|| CoreError::ProtocolViolation("unknown connection".into()))?;
        let agent_id = connection
            .agent_id
            .clone()
            .ok_or_else(|| CoreError::ProtocolViolation("task.failed before register".into()))?;
        let task_id = uuid::Uuid::parse_str(&body.task_id)
            .map_err(|err| CoreError::InvalidParams { field: "task_id".into(), reason: err.to_string() })?;

        let current = ctx.task_store.get(&connection.tenant_id, task_id).await?;
        let next_attempt = current.assignment.attempt + 1;
        let will_retry = body.retryable && next_attempt < ctx.retry.max_attempts;

        ctx.task_store
            .transition(
                &connection.tenant_id,
                task_id,
                TaskStatus::Failed { reason: body.message, retryable: will_retry },
                "agent reported failure",
            )
            .await?;
        ctx.registry.release_slot(&connection.tenant_id, &agent_id, false);

        if will_retry {
            schedule_retry(ctx.clone(), connection.tenant_id.clone(), task_id, current.priority, next_attempt);
        }

        encode_body(&Ack { ok: true })
    }
}

/// Sleeps out the backoff window in a detached task rather than inline, so
/// the retry delay doesn't tie up one of the method's limited worker slots
/// (spec §4.5 retry/backoff).
fn schedule_retry(ctx: HandlerContext, tenant_id: String, task_id: uuid::Uuid, priority: u8, attempt: u32) {
    tokio::spawn(async move {
        let delay = backoff_with_jitter(&ctx.retry, attempt);
        tokio::time::sleep(delay).await;

        if let Err(err) = ctx
            .task_store
            .transition(&tenant_id, task_id, TaskStatus::Pending, "retrying after backoff")
            .await
        {
            warn!(task_id = %task_id, %err, "failed to requeue task for retry");
            return;
        }

        if let Err(err) = ctx
            .queue_broker
            .enqueue(task_id, priority, ctx.retry.requeue_visibility)
            .await
        {
            warn!(task_id = %task_id, %err, "failed to enqueue retried task");
        }
    });
}

pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn handle(&self, _ctx: &HandlerContext, _connection_id: u64, _frame: &Frame) -> CoreResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

pub fn pong_frame(sequence_id: u64) -> Frame {
    Frame::new(FrameType::Pong, sequence_id, Method::Pong as u16, FrameFlags::empty(), Vec::new())
}
