//! C4 Agent Registry (spec §4.4).
//!
//! In-memory authoritative map of `(tenant_id, agent_id) -> Agent`, generalized
//! from the teacher's `agents::AgentRegistry` (a single `RwLock<HashMap>`)
//! into the per-tenant reader/writer lock the spec calls for, with workload
//! counters split into finer-grained atomics (see [`slot::AgentSlot`]).

pub mod agent;
pub mod ops;
mod slot;
pub mod sweeper;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub use agent::{Agent, AgentStatus, Capability, Workload};
pub use ops::CapabilityOp;
pub use slot::AgentHandle;
use slot::AgentSlot;

use crate::clock::{Clock, SharedClock};
use crate::error::{CoreError, CoreResult};

type TenantAgents = RwLock<HashMap<String, AgentHandle>>;

#[derive(Clone)]
pub struct AgentRegistry {
    tenants: Arc<RwLock<HashMap<String, Arc<TenantAgents>>>>,
    clock: SharedClock,
    default_heartbeat_interval_ms: u64,
    default_missed_beat_threshold: u32,
    ewma_alpha: f64,
}

pub struct RegisterParams {
    pub tenant_id: String,
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: Vec<Capability>,
    pub max_concurrent: u32,
}

impl AgentRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            tenants: Arc::new(RwLock::new(HashMap::new())),
            clock,
            default_heartbeat_interval_ms: 30_000,
            default_missed_beat_threshold: 3,
            ewma_alpha: Workload::DEFAULT_ALPHA,
        }
    }

    pub fn with_heartbeat_defaults(mut self, interval_ms: u64, missed_beats: u32) -> Self {
        self.default_heartbeat_interval_ms = interval_ms;
        self.default_missed_beat_threshold = missed_beats;
        self
    }

    pub fn with_ewma_alpha(mut self, alpha: f64) -> Self {
        self.ewma_alpha = alpha;
        self
    }

    fn tenant_bucket(&self, tenant_id: &str) -> Arc<TenantAgents> {
        if let Some(bucket) = self.tenants.read().get(tenant_id) {
            return Arc::clone(bucket);
        }
        let mut tenants = self.tenants.write();
        Arc::clone(
            tenants
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(HashMap::new()))),
        )
    }

    /// Creates or revives an Agent; idempotent on `agent_id` — a duplicate
    /// register from the same identity is a refresh, not a failure (spec
    /// §4.4 "Failure semantics"). Draining -> Active preserves counters;
    /// Inactive -> Active resets `current_tasks`.
    pub fn register(&self, params: RegisterParams) -> AgentHandle {
        let now = self.clock.now();
        let bucket = self.tenant_bucket(&params.tenant_id);
        let mut agents = bucket.write();

        if let Some(existing) = agents.get(&params.agent_id) {
            let was_draining = existing.snapshot().status == AgentStatus::Draining;
            existing.revive(now, was_draining);
            return Arc::clone(existing);
        }

        let handle = AgentSlot::new(
            params.tenant_id,
            params.agent_id.clone(),
            params.agent_type,
            params.capabilities,
            params.max_concurrent,
            self.default_heartbeat_interval_ms,
            self.default_missed_beat_threshold,
            now,
        );
        agents.insert(params.agent_id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, tenant_id: &str, agent_id: &str) -> Option<AgentHandle> {
        self.tenant_bucket(tenant_id).read().get(agent_id).cloned()
    }

    pub fn set_connection(&self, tenant_id: &str, agent_id: &str, connection_id: Option<u64>) {
        if let Some(handle) = self.get(tenant_id, agent_id) {
            handle.set_connection_id(connection_id);
        }
    }

    pub fn update_capabilities(
        &self,
        tenant_id: &str,
        agent_id: &str,
        op: CapabilityOp,
        capability: Capability,
    ) -> CoreResult<()> {
        let handle = self
            .get(tenant_id, agent_id)
            .ok_or_else(|| CoreError::InvalidParams {
                field: "agent_id".into(),
                reason: "unknown agent".into(),
            })?;
        handle.update_capability(op, capability);
        Ok(())
    }

    pub fn heartbeat(
        &self,
        tenant_id: &str,
        agent_id: &str,
        latency_ms: Option<f64>,
        cost_usd: Option<f64>,
    ) -> CoreResult<()> {
        let handle = self
            .get(tenant_id, agent_id)
            .ok_or_else(|| CoreError::InvalidParams {
                field: "agent_id".into(),
                reason: "unknown agent".into(),
            })?;
        handle.heartbeat(latency_ms, cost_usd, self.ewma_alpha, self.clock.now());
        Ok(())
    }

    /// spec §4.4 `ReserveSlot`.
    pub fn reserve_slot(&self, tenant_id: &str, agent_id: &str) -> bool {
        match self.get(tenant_id, agent_id) {
            Some(handle) => handle.reserve_slot(),
            None => false,
        }
    }

    /// spec §4.4 `ReleaseSlot`.
    pub fn release_slot(&self, tenant_id: &str, agent_id: &str, success: bool) {
        if let Some(handle) = self.get(tenant_id, agent_id) {
            handle.release_slot(success);
        }
    }

    pub fn set_status(&self, tenant_id: &str, agent_id: &str, status: AgentStatus) {
        if let Some(handle) = self.get(tenant_id, agent_id) {
            handle.set_status(status);
        }
    }

    /// spec §4.4 `Filter`: a point-in-time snapshot, no torn capability
    /// lists (each `Agent` is materialized under its own slot's lock).
    pub fn filter<F>(&self, tenant_id: &str, mut predicate: F) -> Vec<Agent>
    where
        F: FnMut(&Agent) -> bool,
    {
        let bucket = self.tenant_bucket(tenant_id);
        let agents = bucket.read();
        agents
            .values()
            .map(|handle| handle.snapshot())
            .filter(|agent| predicate(agent))
            .collect()
    }

    pub fn all_tenants(&self) -> Vec<String> {
        self.tenants.read().keys().cloned().collect()
    }

    /// Marks any agent whose heartbeat has gone stale as Inactive (spec
    /// §4.4 `Sweeper`, P8). Uses the registry's injected clock, never wall
    /// time, so tests can drive this deterministically.
    pub fn sweep_lost_agents(&self) -> Vec<(String, String)> {
        let now = self.clock.now();
        let mut lost = Vec::new();
        for tenant_id in self.all_tenants() {
            let bucket = self.tenant_bucket(&tenant_id);
            let agents = bucket.read();
            for handle in agents.values() {
                if handle.snapshot().status != AgentStatus::Inactive && handle.is_lost(now) {
                    handle.set_status(AgentStatus::Inactive);
                    lost.push((tenant_id.clone(), handle.agent_id.clone()));
                }
            }
        }
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteerableClock;
    use std::time::Duration;

    fn register_test_agent(registry: &AgentRegistry, max_concurrent: u32) -> AgentHandle {
        registry.register(RegisterParams {
            tenant_id: "tenant-a".into(),
            agent_id: "agent-1".into(),
            agent_type: "worker".into(),
            capabilities: vec![Capability {
                name: "code_review".into(),
                confidence: 0.9,
                specialties: vec![],
                languages: vec!["go".into()],
                model_id: None,
            }],
            max_concurrent,
        })
    }

    #[test]
    fn reserve_slot_respects_max_concurrent() {
        let clock = Arc::new(SteerableClock::new());
        let registry = AgentRegistry::new(clock);
        register_test_agent(&registry, 1);

        assert!(registry.reserve_slot("tenant-a", "agent-1"));
        assert!(!registry.reserve_slot("tenant-a", "agent-1"));

        registry.release_slot("tenant-a", "agent-1", true);
        assert!(registry.reserve_slot("tenant-a", "agent-1"));
    }

    #[test]
    fn register_is_idempotent_refresh_not_failure() {
        let clock = Arc::new(SteerableClock::new());
        let registry = AgentRegistry::new(clock);
        let first = register_test_agent(&registry, 2);
        first.reserve_slot();

        let second = register_test_agent(&registry, 2);
        assert_eq!(second.current_tasks(), 0, "Inactive->Active resets counters");
    }

    #[test]
    fn draining_to_active_preserves_current_tasks() {
        let clock = Arc::new(SteerableClock::new());
        let registry = AgentRegistry::new(clock);
        let handle = register_test_agent(&registry, 2);
        handle.reserve_slot();
        handle.set_status(AgentStatus::Draining);

        register_test_agent(&registry, 2);
        assert_eq!(handle.current_tasks(), 1);
    }

    #[test]
    fn sweeper_marks_stale_agents_inactive() {
        let clock = Arc::new(SteerableClock::new());
        let registry = AgentRegistry::new(Arc::clone(&clock) as SharedClock)
            .with_heartbeat_defaults(1_000, 3);
        register_test_agent(&registry, 1);

        assert!(registry.sweep_lost_agents().is_empty());

        clock.advance(Duration::from_millis(3_001));
        let lost = registry.sweep_lost_agents();
        assert_eq!(lost, vec![("tenant-a".to_string(), "agent-1".to_string())]);

        let snapshot = registry.get("tenant-a", "agent-1").unwrap().snapshot();
        assert_eq!(snapshot.status, AgentStatus::Inactive);
    }

    #[test]
    fn capability_replace_preserves_workload_stats() {
        let clock = Arc::new(SteerableClock::new());
        let registry = AgentRegistry::new(clock);
        let handle = register_test_agent(&registry, 2);
        handle.reserve_slot();
        handle.release_slot(true);

        registry
            .update_capabilities(
                "tenant-a",
                "agent-1",
                CapabilityOp::Replace,
                Capability {
                    name: "rust".into(),
                    confidence: 0.8,
                    specialties: vec![],
                    languages: vec!["rust".into()],
                    model_id: None,
                },
            )
            .unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.capabilities.len(), 1);
        assert_eq!(snapshot.capabilities[0].name, "rust");
        assert_eq!(snapshot.workload.success_count, 1);
    }
}
