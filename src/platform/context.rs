use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::assignment::{self, AssignmentEngine, DispatcherConfig};
use crate::audit_logging::AuditLogger;
use crate::connection::ConnectionManager;
use crate::cost::CostGate;
use crate::error::CoreResult;
use crate::platform::config::PlatformConfig;
use crate::queue::SharedQueueBroker;
use crate::registry::AgentRegistry;
use crate::tasks::{NewTask, SharedTaskStore, Task};

#[derive(Clone)]
pub struct PlatformContext {
    shared: Arc<SharedState>,
    shutdown: CancellationToken,
}

struct SharedState {
    config: PlatformConfig,
    audit_logger: Arc<AuditLogger>,
    registry: AgentRegistry,
    task_store: SharedTaskStore,
    cost_gate: Arc<CostGate>,
    queue_broker: SharedQueueBroker,
    assignment_engine: Arc<AssignmentEngine>,
    connections: Arc<ConnectionManager>,
    dispatcher_config: DispatcherConfig,
}

impl PlatformContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: PlatformConfig,
        audit_logger: Arc<AuditLogger>,
        registry: AgentRegistry,
        task_store: SharedTaskStore,
        cost_gate: Arc<CostGate>,
        queue_broker: SharedQueueBroker,
        assignment_engine: Arc<AssignmentEngine>,
        connections: Arc<ConnectionManager>,
        dispatcher_config: DispatcherConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let shared = SharedState {
            config,
            audit_logger,
            registry,
            task_store,
            cost_gate,
            queue_broker,
            assignment_engine,
            connections,
            dispatcher_config,
        };

        Self {
            shared: Arc::new(shared),
            shutdown,
        }
    }

    /// spec §4.1 control flow entry point: budget-check, persist `Pending`,
    /// enqueue for the Assignment Engine's background dispatch loop.
    pub async fn submit_task(&self, params: NewTask) -> CoreResult<Task> {
        assignment::submit_task(
            &self.shared.task_store,
            &self.shared.cost_gate,
            &self.shared.queue_broker,
            &self.shared.dispatcher_config,
            params,
        )
        .await
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.shared.config
    }

    pub fn audit_logger(&self) -> Arc<AuditLogger> {
        Arc::clone(&self.shared.audit_logger)
    }

    pub fn registry(&self) -> AgentRegistry {
        self.shared.registry.clone()
    }

    pub fn task_store(&self) -> SharedTaskStore {
        Arc::clone(&self.shared.task_store)
    }

    pub fn cost_gate(&self) -> Arc<CostGate> {
        Arc::clone(&self.shared.cost_gate)
    }

    pub fn queue_broker(&self) -> SharedQueueBroker {
        Arc::clone(&self.shared.queue_broker)
    }

    pub fn assignment_engine(&self) -> Arc<AssignmentEngine> {
        Arc::clone(&self.shared.assignment_engine)
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.shared.connections)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
