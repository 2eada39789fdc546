//! Axum `/ws` upgrade route wiring a live WebSocket into the Connection
//! Manager (spec §4.2 handshake). The rest of the crate never depends on
//! `axum`'s websocket types directly; this module is the one seam that does.

pub mod axum_ws;

pub use axum_ws::AxumWebSocketTransport;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Json, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tokio_util::sync::CancellationToken;

use crate::connection::{is_compatible_subprotocol, ConnectionManager};
use crate::platform::PlatformContext;
use crate::tasks::{NewTask, RequiredCapability};

#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    pub tenant_id: String,
    pub agent_id: Option<String>,
}

/// `GET /ws?tenant_id=...&agent_id=...`. Rejects the upgrade outright if the
/// client didn't offer the `mcp.v1` subprotocol (spec §4.2/§7 `UpgradeRequired`).
pub async fn ws_upgrade_handler(
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(connections): State<Arc<ConnectionManager>>,
) -> Response {
    let offered: Vec<String> = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').map(|p| p.trim().to_string()).collect())
        .unwrap_or_default();

    if is_compatible_subprotocol(&offered).is_err() {
        return (StatusCode::UPGRADE_REQUIRED, "missing mcp.v1 subprotocol").into_response();
    }

    ws.protocols(["mcp.v1"])
        .on_upgrade(move |socket| async move {
            let transport = AxumWebSocketTransport::new(socket);
            connections.accept(params.tenant_id, params.agent_id, transport, CancellationToken::new());
        })
        .into_response()
}

/// Requester-facing submission DTO (spec §4.1: "A requester ... submits a
/// task"). Not part of the agent wire protocol — this is the external seam
/// that feeds it.
#[derive(Debug, Deserialize)]
pub struct TaskSubmitRequest {
    pub tenant_id: String,
    pub requester_id: String,
    pub session_id: Option<String>,
    pub task_type: String,
    #[serde(default)]
    pub priority: u8,
    pub payload: Value,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub required_capabilities: Vec<RequiredCapability>,
    pub cost_budget_usd: f64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskSubmitResponse {
    pub task_id: String,
    pub status: String,
}

/// `POST /tasks`.
pub async fn submit_task_handler(
    State(context): State<PlatformContext>,
    Json(req): Json<TaskSubmitRequest>,
) -> Response {
    let params = NewTask {
        tenant_id: req.tenant_id,
        requester_id: req.requester_id,
        session_id: req.session_id,
        task_type: req.task_type,
        priority: req.priority,
        payload: req.payload,
        deadline: req.deadline,
        required_capabilities: req.required_capabilities,
        cost_budget_usd: req.cost_budget_usd,
        idempotency_key: req.idempotency_key,
    };

    match context.submit_task(params).await {
        Ok(task) => (
            StatusCode::ACCEPTED,
            Json(TaskSubmitResponse { task_id: task.task_id.to_string(), status: task.status.label().to_string() }),
        )
            .into_response(),
        Err(err) => {
            let status = status_for_error(&err);
            (status, Json(serde_json::json!({ "error": err.to_string(), "code": err.code() }))).into_response()
        }
    }
}

fn status_for_error(err: &crate::error::CoreError) -> StatusCode {
    use crate::error::CoreError;
    match err {
        CoreError::BudgetExceeded(_) => StatusCode::PAYMENT_REQUIRED,
        CoreError::InvalidParams { .. } => StatusCode::BAD_REQUEST,
        CoreError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
        CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        CoreError::ConflictState(_) => StatusCode::CONFLICT,
        CoreError::Retryable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
