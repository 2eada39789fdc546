//! C3 Session Router (spec §4.3): demultiplexes decoded frames to method
//! handlers, enforcing per-connection sequence ordering and per-method
//! priority/concurrency. Sits between the Connection Manager's inbound
//! channel and the Registry/Task Store/Assignment Engine/Cost Gate.

pub mod dispatch;
pub mod handlers;
pub mod sequence;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use dispatch::{DispatchItem, MethodDispatcher};
pub use handlers::{HandlerContext, MethodHandler};
pub use sequence::SequenceWindow;

use crate::error::{CoreError, CoreResult};
use crate::protocol::frame::{Frame, FrameFlags, FrameType, Method};
use crate::protocol::methods::{ErrorBody, TaskAssignedNotification, TaskCancelNotification};
use crate::tasks::model::Task;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub sequence_tolerance: u64,
    pub queue_capacity_per_method: usize,
    pub concurrency_per_method: usize,
    pub protocol_violation_threshold: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            sequence_tolerance: 16,
            queue_capacity_per_method: 128,
            concurrency_per_method: 16,
            protocol_violation_threshold: 5,
        }
    }
}

/// Owns one [`MethodDispatcher`] per method code and one [`SequenceWindow`]
/// per live connection. Frames arrive over the Connection Manager's
/// `InboundSender` channel; [`SessionRouter::run`] is the demultiplex loop.
pub struct SessionRouter {
    config: RouterConfig,
    ctx: HandlerContext,
    dispatchers: HashMap<u16, Arc<MethodDispatcher>>,
    handlers: HashMap<u16, Arc<dyn MethodHandler>>,
    sequences: RwLock<HashMap<u64, Arc<SequenceWindow>>>,
    violations: RwLock<HashMap<u64, AtomicU32>>,
}

impl SessionRouter {
    pub fn new(config: RouterConfig, ctx: HandlerContext) -> Arc<Self> {
        let mut handlers: HashMap<u16, Arc<dyn MethodHandler>> = HashMap::new();
        handlers.insert(Method::AgentRegister as u16, Arc::new(handlers::AgentRegisterHandler));
        handlers.insert(Method::AgentHeartbeat as u16, Arc::new(handlers::AgentHeartbeatHandler));
        handlers.insert(
            Method::AgentCapabilityUpdate as u16,
            Arc::new(handlers::AgentCapabilityUpdateHandler),
        );
        handlers.insert(Method::AgentShutdown as u16, Arc::new(handlers::AgentShutdownHandler));
        handlers.insert(Method::TaskProgress as u16, Arc::new(handlers::TaskProgressHandler));
        handlers.insert(Method::TaskComplete as u16, Arc::new(handlers::TaskCompleteHandler));
        handlers.insert(Method::TaskFailed as u16, Arc::new(handlers::TaskFailedHandler));
        handlers.insert(Method::Ping as u16, Arc::new(handlers::PingHandler));

        let mut dispatchers = HashMap::new();
        for &method in handlers.keys() {
            dispatchers.insert(
                method,
                Arc::new(MethodDispatcher::new(config.queue_capacity_per_method, config.concurrency_per_method)),
            );
        }

        let router = Arc::new(Self {
            config,
            ctx,
            dispatchers,
            handlers,
            sequences: RwLock::new(HashMap::new()),
            violations: RwLock::new(HashMap::new()),
        });

        for (&method, dispatcher) in &router.dispatchers {
            let router = Arc::clone(&router);
            let handler = Arc::clone(&router.handlers[&method]);
            dispatcher.spawn_workers(move |item: DispatchItem| {
                let router = Arc::clone(&router);
                let handler = Arc::clone(&handler);
                async move {
                    router.invoke(handler, item).await;
                }
            });
        }

        router
    }

    async fn invoke(&self, handler: Arc<dyn MethodHandler>, item: DispatchItem) {
        let DispatchItem { connection_id, frame } = item;
        let result = handler.handle(&self.ctx, connection_id, &frame).await;

        let Some(connection) = self.ctx.connections.get(connection_id) else {
            return;
        };

        match result {
            Ok(body) if frame.method == Method::Ping as u16 => {
                let pong = handlers::pong_frame(frame.sequence_id);
                let _ = (body, connection.send(pong, false, std::time::Duration::from_secs(5)).await);
            }
            Ok(body) => {
                let response = Frame::new(FrameType::Response, frame.sequence_id, frame.method, FrameFlags::empty(), body);
                connection.send(response, false, std::time::Duration::from_secs(5)).await;
            }
            Err(err) => {
                warn!(connection_id, method = frame.method, %err, "method handler failed");
                let body = serde_json::to_vec(&ErrorBody::from(&err)).unwrap_or_default();
                let error_frame = Frame::new(FrameType::Error, frame.sequence_id, frame.method, FrameFlags::empty(), body);
                connection.send(error_frame, true, std::time::Duration::from_secs(5)).await;
                if matches!(err, CoreError::ProtocolViolation(_) | CoreError::MalformedFrame(_)) {
                    self.record_violation(connection_id).await;
                }
            }
        }
    }

    async fn record_violation(&self, connection_id: u64) {
        let count = {
            let violations = self.violations.read();
            if let Some(counter) = violations.get(&connection_id) {
                counter.fetch_add(1, Ordering::AcqRel) + 1
            } else {
                drop(violations);
                self.violations.write().insert(connection_id, AtomicU32::new(1));
                1
            }
        };
        if count >= self.config.protocol_violation_threshold {
            warn!(connection_id, count, "protocol violation threshold exceeded, closing connection");
            self.ctx.connections.close_gracefully(connection_id, "protocol_violation_threshold").await;
        }
    }

    fn sequence_window(&self, connection_id: u64) -> Arc<SequenceWindow> {
        if let Some(window) = self.sequences.read().get(&connection_id) {
            return Arc::clone(window);
        }
        let mut sequences = self.sequences.write();
        Arc::clone(
            sequences
                .entry(connection_id)
                .or_insert_with(|| Arc::new(SequenceWindow::new(self.config.sequence_tolerance))),
        )
    }

    fn forget_connection(&self, connection_id: u64) {
        self.sequences.write().remove(&connection_id);
        self.violations.write().remove(&connection_id);
    }

    /// The demultiplex loop: pulls `(connection_id, frame)` off the
    /// Connection Manager's inbound channel, validates sequencing, and
    /// pushes to the frame's method dispatcher. Runs until `inbound` closes
    /// or `token` is cancelled.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<(u64, Frame)>, token: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = inbound.recv() => next,
            };
            let Some((connection_id, frame)) = next else { break };

            if matches!(frame.frame_type, FrameType::Ping | FrameType::Pong) {
                // Heartbeat frames don't consume the sequence window.
            } else if let Err(err) = self.sequence_window(connection_id).accept(frame.sequence_id) {
                debug!(connection_id, %err, "rejecting out-of-window frame");
                self.record_violation(connection_id).await;
                continue;
            }

            let Some(dispatcher) = self.dispatchers.get(&frame.method) else {
                debug!(connection_id, method = frame.method, "no dispatcher for method");
                if let Some(connection) = self.ctx.connections.get(connection_id) {
                    let err = CoreError::MethodNotFound(frame.method.to_string());
                    let body = serde_json::to_vec(&ErrorBody::from(&err)).unwrap_or_default();
                    let error_frame = Frame::new(FrameType::Error, frame.sequence_id, frame.method, FrameFlags::empty(), body);
                    connection.send(error_frame, true, std::time::Duration::from_secs(5)).await;
                }
                continue;
            };

            let priority = frame.is_priority();
            if !dispatcher.push(DispatchItem { connection_id, frame: frame.clone() }, priority) {
                warn!(connection_id, method = frame.method, "dispatch queue full, rate limiting");
                if let Some(connection) = self.ctx.connections.get(connection_id) {
                    let err = CoreError::RateLimited("dispatch queue full".into());
                    let body = serde_json::to_vec(&ErrorBody::from(&err)).unwrap_or_default();
                    let error_frame = Frame::new(FrameType::Error, frame.sequence_id, frame.method, FrameFlags::empty(), body);
                    connection.send(error_frame, true, std::time::Duration::from_secs(5)).await;
                }
            }
        }
    }

    pub fn drop_connection_state(&self, connection_id: u64) {
        self.forget_connection(connection_id);
    }
}

/// Builds the `task.assigned` server->agent notification (spec §4.3
/// catalog); sent directly over the agent's `ConnectionHandle` by whatever
/// drives the Assignment Engine, not dispatched through this router.
pub fn task_assigned_frame(sequence_id: u64, task: &Task) -> CoreResult<Frame> {
    let body = TaskAssignedNotification {
        task_id: task.task_id.to_string(),
        task_type: task.task_type.clone(),
        priority: task.priority,
        deadline_ms: task.deadline.map(|d| d.timestamp_millis() as u64),
        payload: task.payload.clone(),
        required_capabilities: task.required_capabilities.clone(),
    };
    let payload = serde_json::to_vec(&body).map_err(|err| CoreError::Fatal(err.to_string()))?;
    Ok(Frame::new(FrameType::Notification, sequence_id, Method::TaskAssigned as u16, FrameFlags::empty(), payload))
}

/// Builds the `task.cancel` server->agent notification.
pub fn task_cancel_frame(sequence_id: u64, task_id: &str, reason: &str) -> CoreResult<Frame> {
    let body = TaskCancelNotification { task_id: task_id.to_string(), reason: reason.to_string() };
    let payload = serde_json::to_vec(&body).map_err(|err| CoreError::Fatal(err.to_string()))?;
    Ok(Frame::new(FrameType::Notification, sequence_id, Method::TaskCancel as u16, FrameFlags::empty(), payload))
}
