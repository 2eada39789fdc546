//! The mutable record behind an [`Agent`] snapshot, with `current_tasks`
//! pulled out into an atomic so [`AgentSlot::reserve_slot`] /
//! [`AgentSlot::release_slot`] never need the coarser per-tenant lock
//! (spec §4.4: "per-agent fields protected by a finer-grained lock when
//! updating workload counters").

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::agent::{Agent, AgentStatus, Capability, Workload};

#[derive(Debug)]
struct AgentInner {
    agent_type: String,
    connection_id: Option<u64>,
    capabilities: Vec<Capability>,
    status: AgentStatus,
    success_count: u64,
    failure_count: u64,
    ewma_latency_ms: f64,
    ewma_cost_usd: f64,
    last_seen: Instant,
    heartbeat_interval_ms: u64,
    missed_beat_threshold: u32,
}

#[derive(Debug)]
pub struct AgentSlot {
    pub tenant_id: String,
    pub agent_id: String,
    current_tasks: AtomicU32,
    max_concurrent: AtomicU32,
    inner: Mutex<AgentInner>,
}

pub type AgentHandle = Arc<AgentSlot>;

impl AgentSlot {
    pub fn new(
        tenant_id: String,
        agent_id: String,
        agent_type: String,
        capabilities: Vec<Capability>,
        max_concurrent: u32,
        heartbeat_interval_ms: u64,
        missed_beat_threshold: u32,
        now: Instant,
    ) -> AgentHandle {
        Arc::new(Self {
            tenant_id,
            agent_id,
            current_tasks: AtomicU32::new(0),
            max_concurrent: AtomicU32::new(max_concurrent.max(1)),
            inner: Mutex::new(AgentInner {
                agent_type,
                connection_id: None,
                capabilities,
                status: AgentStatus::Active,
                success_count: 0,
                failure_count: 0,
                ewma_latency_ms: 0.0,
                ewma_cost_usd: 0.0,
                last_seen: now,
                heartbeat_interval_ms,
                missed_beat_threshold,
            }),
        })
    }

    /// Atomically increments `current_tasks` iff `< max_concurrent`
    /// (spec §4.4 `ReserveSlot`, invariant 1).
    pub fn reserve_slot(&self) -> bool {
        let max = self.max_concurrent.load(Ordering::Acquire);
        let mut current = self.current_tasks.load(Ordering::Acquire);
        loop {
            if current >= max {
                return false;
            }
            match self.current_tasks.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release_slot(&self, success: bool) {
        self.current_tasks.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some(v.saturating_sub(1))
        }).ok();
        let mut inner = self.inner.lock();
        if success {
            inner.success_count += 1;
        } else {
            inner.failure_count += 1;
        }
    }

    pub fn current_tasks(&self) -> u32 {
        self.current_tasks.load(Ordering::Acquire)
    }

    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent.load(Ordering::Acquire)
    }

    pub fn heartbeat(&self, latency_ms: Option<f64>, cost_usd: Option<f64>, alpha: f64, now: Instant) {
        let mut inner = self.inner.lock();
        inner.last_seen = now;
        let mut workload = Workload {
            current_tasks: 0,
            max_concurrent: 0,
            success_count: 0,
            failure_count: 0,
            ewma_latency_ms: inner.ewma_latency_ms,
            ewma_cost_usd: inner.ewma_cost_usd,
        };
        workload.observe(latency_ms, cost_usd, alpha);
        inner.ewma_latency_ms = workload.ewma_latency_ms;
        inner.ewma_cost_usd = workload.ewma_cost_usd;
        if inner.status == AgentStatus::Inactive {
            inner.status = AgentStatus::Active;
        }
    }

    pub fn touch(&self, now: Instant) {
        self.inner.lock().last_seen = now;
    }

    pub fn set_status(&self, status: AgentStatus) {
        self.inner.lock().status = status;
    }

    pub fn set_connection_id(&self, connection_id: Option<u64>) {
        self.inner.lock().connection_id = connection_id;
    }

    pub fn revive(&self, now: Instant, preserve_counters: bool) {
        let mut inner = self.inner.lock();
        inner.status = AgentStatus::Active;
        inner.last_seen = now;
        if !preserve_counters {
            self.current_tasks.store(0, Ordering::Release);
        }
    }

    /// `op in {add, remove, replace}` (spec §4.4 `UpdateCapabilities`).
    /// Duplicate names for `add` coalesce by max confidence + union of
    /// specialties. `replace` preserves workload statistics (Open Question
    /// decision, SPEC_FULL §4.2).
    pub fn update_capability(&self, op: super::ops::CapabilityOp, capability: Capability) {
        let capability = capability.clamp_confidence();
        let mut inner = self.inner.lock();
        match op {
            super::ops::CapabilityOp::Add => {
                if let Some(existing) = inner
                    .capabilities
                    .iter_mut()
                    .find(|c| c.name == capability.name)
                {
                    existing.confidence = existing.confidence.max(capability.confidence);
                    for specialty in capability.specialties {
                        if !existing.specialties.contains(&specialty) {
                            existing.specialties.push(specialty);
                        }
                    }
                    for lang in capability.languages {
                        if !existing.languages.contains(&lang) {
                            existing.languages.push(lang);
                        }
                    }
                } else {
                    inner.capabilities.push(capability);
                }
            }
            super::ops::CapabilityOp::Remove => {
                inner.capabilities.retain(|c| c.name != capability.name);
            }
            super::ops::CapabilityOp::Replace => {
                inner.capabilities = vec![capability];
            }
        }
    }

    pub fn snapshot(&self) -> Agent {
        let inner = self.inner.lock();
        Agent {
            tenant_id: self.tenant_id.clone(),
            agent_id: self.agent_id.clone(),
            agent_type: inner.agent_type.clone(),
            connection_id: inner.connection_id,
            capabilities: inner.capabilities.clone(),
            status: inner.status,
            workload: Workload {
                current_tasks: self.current_tasks(),
                max_concurrent: self.max_concurrent(),
                success_count: inner.success_count,
                failure_count: inner.failure_count,
                ewma_latency_ms: inner.ewma_latency_ms,
                ewma_cost_usd: inner.ewma_cost_usd,
            },
            last_seen: inner.last_seen,
            heartbeat_interval_ms: inner.heartbeat_interval_ms,
            missed_beat_threshold: inner.missed_beat_threshold,
        }
    }

    pub fn is_lost(&self, now: Instant) -> bool {
        self.snapshot().is_lost(now)
    }
}
