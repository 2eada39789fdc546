use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Duration as ChronoDuration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::assignment::{
    spawn_assignment_loop, AssignmentEngine, CapabilityMatch, CostOptimized, DispatcherConfig,
    LeastLoaded, PerformanceBased, RetryConfig, RoundRobin,
};
use crate::audit_logging::{self, AuditLogger};
use crate::clock;
use crate::connection::{ConnectionManager, ConnectionManagerConfig};
use crate::cost::{spawn_budget_sweeper, CostGate, CostGateConfig};
use crate::platform::config::{AuditSettings, PlatformConfig, QueueBackend, TaskStoreBackend};
use crate::platform::context::PlatformContext;
use crate::platform::service::ServiceRegistration;
use crate::platform::telemetry::telemetry_service;
use crate::protocol::codec::CodecConfig;
use crate::queue::{spawn_dead_letter_drainer, MemoryQueueBroker, RedisQueueBroker, SharedQueueBroker};
use crate::registry::{sweeper as registry_sweeper, AgentRegistry};
use crate::router::{HandlerContext, RouterConfig, SessionRouter};
use crate::tasks::{spawn_deadline_sweeper, InMemoryTaskStore, PostgresTaskStore, SharedTaskStore};

pub struct Platform {
    config: PlatformConfig,
    services: Vec<ServiceRegistration>,
}

impl Platform {
    pub fn new(config: PlatformConfig) -> Self {
        let mut services = Vec::new();
        services.push(telemetry_service(config.observability.clone()));

        Self { config, services }
    }

    pub fn register_service(&mut self, service: ServiceRegistration) {
        self.services.push(service);
    }

    pub async fn start(self) -> Result<PlatformRuntime> {
        initialize_logging(&self.config);

        let audit_logger = Arc::new(init_audit_logger(&self.config.audit)?);
        audit_logging::install_global(Arc::clone(&audit_logger));

        let registry = AgentRegistry::new(clock::system_clock())
            .with_heartbeat_defaults(
                self.config.protocol.heartbeat_interval_ms,
                self.config.registry.missed_beat_threshold,
            )
            .with_ewma_alpha(self.config.registry.ewma_alpha);

        let task_store: SharedTaskStore = match self.config.task_store.backend {
            TaskStoreBackend::Memory => Arc::new(InMemoryTaskStore::new()),
            TaskStoreBackend::Postgres => Arc::new(
                PostgresTaskStore::connect(
                    &self.config.task_store.database_url,
                    self.config.task_store.max_connections,
                )
                .await?,
            ) as SharedTaskStore,
        };

        let cost_gate = Arc::new(CostGate::new(CostGateConfig {
            warn_ratio: self.config.cost.budget_warn_ratio,
            crit_ratio: self.config.cost.budget_crit_ratio,
            default_session_limit_usd: self.config.cost.session_cost_limit_usd,
            default_tenant_daily_limit_usd: self.config.cost.tenant_daily_cost_limit_usd,
        }));

        let queue_broker: SharedQueueBroker = match self.config.queue.backend {
            QueueBackend::Memory => {
                Arc::new(MemoryQueueBroker::new(clock::system_clock(), self.config.queue.max_receive_count))
                    as SharedQueueBroker
            }
            QueueBackend::Redis => Arc::new(
                RedisQueueBroker::connect(
                    &self.config.queue.redis_url,
                    &self.config.queue.stream_key,
                    self.config.queue.max_receive_count,
                )
                .await?,
            ) as SharedQueueBroker,
        };
        let mut assignment_engine = AssignmentEngine::new(registry.clone(), &self.config.assignment.default_strategy);
        assignment_engine.register_strategy("round_robin", Arc::new(RoundRobin::new()));
        assignment_engine.register_strategy("least_loaded", Arc::new(LeastLoaded::new()));
        assignment_engine.register_strategy(
            "capability_match",
            Arc::new(CapabilityMatch::new(self.config.assignment.specialty_bonus)),
        );
        assignment_engine.register_strategy(
            "performance_based",
            Arc::new(PerformanceBased {
                success_weight: self.config.assignment.performance_success_weight,
                latency_weight: self.config.assignment.performance_latency_weight,
                ..PerformanceBased::default()
            }),
        );
        assignment_engine.register_strategy(
            "cost_optimized",
            Arc::new(
                CostOptimized::new(CostOptimized::ewma_fallback_estimator())
                    .with_quality_floor(self.config.assignment.cost_optimized_quality_floor),
            ),
        );
        assignment_engine.max_reselect = self.config.assignment.max_reselect;
        let assignment_engine = Arc::new(assignment_engine);

        let dispatcher_config = DispatcherConfig {
            poll_batch: self.config.router.concurrency_per_method as u32,
            poll_wait: Duration::from_millis(500),
            assignment_lease: Duration::from_millis(self.config.queue.visibility_timeout_ms),
            no_agent_retry_after: Duration::from_millis(500),
            idempotency_ttl: ChronoDuration::seconds(self.config.task_store.idempotency_ttl_secs),
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.router.queue_capacity_per_method * 4);

        let connections = ConnectionManager::new(
            ConnectionManagerConfig {
                outbound_queue_capacity: self.config.protocol.outbound_queue_capacity,
                ping_interval: Duration::from_millis(self.config.protocol.heartbeat_interval_ms),
                pong_timeout: Duration::from_millis(self.config.protocol.pong_timeout_ms),
                drain_timeout: Duration::from_millis(self.config.protocol.drain_timeout_ms),
                send_suspend_timeout: Duration::from_millis(self.config.protocol.dispatch_timeout_ms),
                codec: CodecConfig {
                    max_frame_bytes: self.config.protocol.max_frame_bytes,
                    compression_min_bytes: self.config.protocol.compression_min_bytes,
                },
            },
            inbound_tx,
        );

        let router = SessionRouter::new(
            RouterConfig {
                sequence_tolerance: self.config.protocol.sequence_tolerance,
                queue_capacity_per_method: self.config.router.queue_capacity_per_method,
                concurrency_per_method: self.config.router.concurrency_per_method,
                protocol_violation_threshold: self.config.protocol.protocol_violation_threshold,
            },
            HandlerContext {
                registry: registry.clone(),
                task_store: Arc::clone(&task_store),
                cost_gate: Arc::clone(&cost_gate),
                connections: Arc::clone(&connections),
                queue_broker: Arc::clone(&queue_broker),
                retry: RetryConfig {
                    max_attempts: self.config.assignment.max_attempts,
                    initial_backoff_ms: self.config.assignment.initial_backoff_ms,
                    max_backoff_ms: self.config.assignment.max_backoff_ms,
                    requeue_visibility: Duration::from_millis(self.config.queue.visibility_timeout_ms),
                },
            },
        );

        let root_token = CancellationToken::new();
        let context = PlatformContext::new(
            self.config.clone(),
            audit_logger,
            registry.clone(),
            Arc::clone(&task_store),
            cost_gate.clone(),
            Arc::clone(&queue_broker),
            Arc::clone(&assignment_engine),
            Arc::clone(&connections),
            dispatcher_config.clone(),
            root_token.child_token(),
        );

        let mut tasks = Vec::new();

        let sweeper_token = root_token.child_token();
        tasks.push((
            "registry-sweeper".to_string(),
            wrap_unit(registry_sweeper::spawn_sweeper(
                registry.clone(),
                Duration::from_millis(self.config.registry.sweep_interval_ms),
                sweeper_token,
            )),
        ));

        let cost_sweeper_token = root_token.child_token();
        tasks.push((
            "cost-sweeper".to_string(),
            wrap_unit(spawn_budget_sweeper(
                cost_gate,
                Duration::from_millis(self.config.cost.sweep_interval_ms),
                cost_sweeper_token,
            )),
        ));

        let deadline_sweeper_token = root_token.child_token();
        tasks.push((
            "deadline-sweeper".to_string(),
            wrap_unit(spawn_deadline_sweeper(
                Arc::clone(&task_store),
                registry.clone(),
                Duration::from_millis(self.config.task_store.deadline_sweep_interval_ms),
                deadline_sweeper_token,
            )),
        ));

        let dlq_drainer_token = root_token.child_token();
        tasks.push((
            "dead-letter-drainer".to_string(),
            wrap_unit(spawn_dead_letter_drainer(
                Arc::clone(&queue_broker),
                Arc::clone(&task_store),
                Duration::from_millis(self.config.queue.dlq_drain_interval_ms),
                dlq_drainer_token,
            )),
        ));

        let assignment_token = root_token.child_token();
        tasks.push((
            "assignment-dispatcher".to_string(),
            wrap_unit(spawn_assignment_loop(
                queue_broker,
                task_store,
                assignment_engine,
                registry,
                Arc::clone(&connections),
                dispatcher_config,
                assignment_token,
            )),
        ));

        let router_token = root_token.child_token();
        tasks.push((
            "session-router".to_string(),
            tokio::spawn(async move {
                router.run(inbound_rx, router_token).await;
                Ok(())
            }),
        ));

        for service in self.services {
            let handle = service.spawn(context.clone(), root_token.child_token());
            tasks.push((service.name().to_string(), handle));
        }

        info!("platform boot completed");

        Ok(PlatformRuntime { context, cancel_token: root_token, tasks })
    }
}

fn wrap_unit(handle: JoinHandle<()>) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        handle.await?;
        Ok(())
    })
}

pub struct PlatformRuntime {
    context: PlatformContext,
    cancel_token: CancellationToken,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl PlatformRuntime {
    pub fn context(&self) -> PlatformContext {
        self.context.clone()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();

        for (name, handle) in self.tasks {
            match handle.await {
                Ok(Ok(())) => info!(service = %name, "service shutdown cleanly"),
                Ok(Err(err)) => return Err(err),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

fn initialize_logging(config: &PlatformConfig) {
    let filter = &config.observability.log_level;
    let _ = tracing_subscriber::fmt().with_env_filter(filter.as_str()).try_init();
}

fn init_audit_logger(settings: &AuditSettings) -> Result<AuditLogger> {
    AuditLogger::new(&settings.log_path, settings.retention_days).map_err(|err| anyhow::anyhow!(err.to_string()))
}
