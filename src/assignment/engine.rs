//! C6 Assignment Engine (spec §4.6): candidate filtering, strategy dispatch,
//! and atomic `ReserveSlot` with bounded reselection.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::candidate::eligible_candidates;
use super::strategies::AssignmentStrategy;
use crate::registry::AgentRegistry;
use crate::tasks::{RejectReason, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Assigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentFailure {
    NoCapableAgent,
    ExhaustedReselect,
}

impl From<AssignmentFailure> for RejectReason {
    fn from(value: AssignmentFailure) -> Self {
        match value {
            AssignmentFailure::NoCapableAgent => RejectReason::NoCapableAgent,
            AssignmentFailure::ExhaustedReselect => RejectReason::NoCapableAgent,
        }
    }
}

pub struct AssignmentEngine {
    registry: AgentRegistry,
    strategies: HashMap<String, Arc<dyn AssignmentStrategy>>,
    default_strategy: String,
    /// Per-tenant or per-task-type overrides (spec §4.6 "pluggable per
    /// tenant or task type").
    tenant_overrides: parking_lot::RwLock<HashMap<String, String>>,
    task_type_overrides: parking_lot::RwLock<HashMap<String, String>>,
    pub max_reselect: u32,
}

impl AssignmentEngine {
    pub fn new(registry: AgentRegistry, default_strategy: &str) -> Self {
        Self {
            registry,
            strategies: HashMap::new(),
            default_strategy: default_strategy.to_string(),
            tenant_overrides: parking_lot::RwLock::new(HashMap::new()),
            task_type_overrides: parking_lot::RwLock::new(HashMap::new()),
            max_reselect: 3,
        }
    }

    pub fn register_strategy(&mut self, name: &str, strategy: Arc<dyn AssignmentStrategy>) {
        self.strategies.insert(name.to_string(), strategy);
    }

    pub fn set_tenant_override(&self, tenant_id: &str, strategy: &str) {
        self.tenant_overrides
            .write()
            .insert(tenant_id.to_string(), strategy.to_string());
    }

    pub fn set_task_type_override(&self, task_type: &str, strategy: &str) {
        self.task_type_overrides
            .write()
            .insert(task_type.to_string(), strategy.to_string());
    }

    fn resolve_strategy(&self, task: &Task) -> Option<Arc<dyn AssignmentStrategy>> {
        let name = self
            .task_type_overrides
            .read()
            .get(&task.task_type)
            .cloned()
            .or_else(|| self.tenant_overrides.read().get(&task.tenant_id).cloned())
            .unwrap_or_else(|| self.default_strategy.clone());
        self.strategies.get(&name).cloned()
    }

    /// spec §4.6 atomicity: select, then `ReserveSlot`; on failure, re-select
    /// among the remaining candidates up to `max_reselect` times.
    pub fn assign(&self, task: &Task) -> Result<(AssignmentOutcome, String), AssignmentFailure> {
        let mut candidates = eligible_candidates(&self.registry, task);
        if candidates.is_empty() {
            return Err(AssignmentFailure::NoCapableAgent);
        }

        let strategy = self.resolve_strategy(task).ok_or_else(|| {
            warn!(task_type = %task.task_type, "no assignment strategy registered, falling back to no-op rejection");
            AssignmentFailure::NoCapableAgent
        })?;

        for attempt in 0..=self.max_reselect {
            if candidates.is_empty() {
                break;
            }
            let picked = match strategy.select(&candidates, task) {
                Some(agent_id) => agent_id,
                None => break,
            };

            if self.registry.reserve_slot(&task.tenant_id, &picked) {
                debug!(task_id = %task.task_id, agent_id = %picked, attempt, "assignment reserved slot");
                return Ok((AssignmentOutcome::Assigned, picked));
            }

            candidates.retain(|a| a.agent_id != picked);
        }

        Err(AssignmentFailure::ExhaustedReselect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::strategies::least_loaded::LeastLoaded;
    use crate::clock::SteerableClock;
    use crate::registry::{Capability, RegisterParams};
    use crate::tasks::NewTask;
    use std::sync::Arc as StdArc;

    fn make_task(tenant: &str) -> Task {
        Task::new(
            NewTask {
                tenant_id: tenant.into(),
                requester_id: "r".into(),
                session_id: None,
                task_type: "code_review".into(),
                priority: 1,
                payload: serde_json::json!({}),
                deadline: None,
                required_capabilities: vec![],
                cost_budget_usd: 1.0,
                idempotency_key: None,
            },
            chrono::Utc::now(),
        )
    }

    #[test]
    fn rejects_when_no_candidates() {
        let clock = StdArc::new(SteerableClock::new());
        let registry = AgentRegistry::new(clock);
        let mut engine = AssignmentEngine::new(registry, "least_loaded");
        engine.register_strategy("least_loaded", StdArc::new(LeastLoaded::new()));

        let task = make_task("tenant-a");
        assert_eq!(engine.assign(&task), Err(AssignmentFailure::NoCapableAgent));
    }

    #[test]
    fn assigns_to_only_candidate() {
        let clock = StdArc::new(SteerableClock::new());
        let registry = AgentRegistry::new(clock);
        registry.register(RegisterParams {
            tenant_id: "tenant-a".into(),
            agent_id: "agent-1".into(),
            agent_type: "worker".into(),
            capabilities: vec![Capability {
                name: "code_review".into(),
                confidence: 0.9,
                specialties: vec![],
                languages: vec![],
                model_id: None,
            }],
            max_concurrent: 1,
        });

        let mut engine = AssignmentEngine::new(registry, "least_loaded");
        engine.register_strategy("least_loaded", StdArc::new(LeastLoaded::new()));

        let task = make_task("tenant-a");
        let (outcome, agent_id) = engine.assign(&task).unwrap();
        assert_eq!(outcome, AssignmentOutcome::Assigned);
        assert_eq!(agent_id, "agent-1");
    }
}
