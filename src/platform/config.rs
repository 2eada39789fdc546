//! Platform configuration (spec §6 "Configuration Surface"), layered the
//! way the teacher loads it: a `configs/platform.toml` file, optionally
//! overridden by a path passed on the CLI, then `AGENTMESH__*` environment
//! variables on top.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "configs/platform.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub metadata: MetadataSettings,
    pub observability: ObservabilitySettings,
    pub audit: AuditSettings,
    pub protocol: ProtocolSettings,
    pub registry: RegistrySettings,
    pub assignment: AssignmentSettings,
    pub cost: CostSettings,
    pub queue: QueueSettings,
    pub task_store: TaskStoreSettings,
    pub router: RouterSettings,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            metadata: MetadataSettings::default(),
            observability: ObservabilitySettings::default(),
            audit: AuditSettings::default(),
            protocol: ProtocolSettings::default(),
            registry: RegistrySettings::default(),
            assignment: AssignmentSettings::default(),
            cost: CostSettings::default(),
            queue: QueueSettings::default(),
            task_store: TaskStoreSettings::default(),
            router: RouterSettings::default(),
        }
    }
}

impl PlatformConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(None::<PathBuf>)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            File::from(PathBuf::from(DEFAULT_CONFIG_PATH))
                .format(FileFormat::Toml)
                .required(false),
        );

        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_ref()).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("AGENTMESH").separator("__"));

        let config = builder.build()?;
        config.try_deserialize().context("invalid platform configuration")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    pub name: String,
    pub environment: String,
    pub cluster: String,
    pub node: String,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            name: "agentmesh".to_string(),
            environment: "development".to_string(),
            cluster: "local".to_string(),
            node: "node-0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub log_level: String,
    pub metrics_port: u16,
    pub enable_metrics: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: 9090,
            enable_metrics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub log_path: String,
    pub retention_days: u32,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log_path: "logs/coordination-events.log".to_string(),
            retention_days: 90,
        }
    }
}

/// Wire/frame limits and connection liveness (spec §4.1/§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    pub max_frame_bytes: u32,
    pub compression_min_bytes: usize,
    pub heartbeat_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub outbound_queue_capacity: usize,
    pub protocol_violation_threshold: u32,
    pub sequence_tolerance: u64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024 * 1024,
            compression_min_bytes: 1024,
            heartbeat_interval_ms: 30_000,
            pong_timeout_ms: 60_000,
            handshake_timeout_ms: 10_000,
            dispatch_timeout_ms: 5_000,
            drain_timeout_ms: 30_000,
            outbound_queue_capacity: 256,
            protocol_violation_threshold: 5,
            sequence_tolerance: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub missed_beat_threshold: u32,
    pub ewma_alpha: f64,
    pub sweep_interval_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            missed_beat_threshold: 3,
            ewma_alpha: 0.2,
            sweep_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentSettings {
    pub default_strategy: String,
    pub max_reselect: u32,
    pub capability_confidence_floor: f32,
    pub specialty_bonus: f32,
    pub performance_success_weight: f64,
    pub performance_latency_weight: f64,
    pub cost_optimized_quality_floor: f64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            default_strategy: "least_loaded".to_string(),
            max_reselect: 3,
            capability_confidence_floor: 0.5,
            specialty_bonus: 0.1,
            performance_success_weight: 1.0,
            performance_latency_weight: 0.5,
            cost_optimized_quality_floor: 0.8,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    pub session_cost_limit_usd: f64,
    pub tenant_daily_cost_limit_usd: f64,
    pub budget_warn_ratio: f64,
    pub budget_crit_ratio: f64,
    pub sweep_interval_ms: u64,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            session_cost_limit_usd: 50.0,
            tenant_daily_cost_limit_usd: 1_000.0,
            budget_warn_ratio: 0.8,
            budget_crit_ratio: 0.95,
            sweep_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    Memory,
    Redis,
}

impl Default for QueueBackend {
    fn default() -> Self {
        QueueBackend::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub backend: QueueBackend,
    pub redis_url: String,
    pub stream_key: String,
    pub max_receive_count: u32,
    pub visibility_timeout_ms: u64,
    pub dlq_drain_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            stream_key: "agentmesh:tasks".to_string(),
            max_receive_count: 5,
            visibility_timeout_ms: 300_000,
            dlq_drain_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStoreBackend {
    Memory,
    Postgres,
}

impl Default for TaskStoreBackend {
    fn default() -> Self {
        TaskStoreBackend::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStoreSettings {
    pub backend: TaskStoreBackend,
    pub database_url: String,
    pub max_connections: u32,
    pub idempotency_ttl_secs: i64,
    pub deadline_sweep_interval_ms: u64,
}

impl Default for TaskStoreSettings {
    fn default() -> Self {
        Self {
            backend: TaskStoreBackend::Memory,
            database_url: "postgres://localhost/agentmesh".to_string(),
            max_connections: 10,
            idempotency_ttl_secs: 86_400,
            deadline_sweep_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub queue_capacity_per_method: usize,
    pub concurrency_per_method: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            queue_capacity_per_method: 128,
            concurrency_per_method: 16,
        }
    }
}
