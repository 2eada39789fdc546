//! spec §4.6 RoundRobin: a tenant-scoped monotonic counter indexes into the
//! (agent_id-sorted) candidate list.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::AssignmentStrategy;
use crate::registry::Agent;
use crate::tasks::Task;

#[derive(Default)]
pub struct RoundRobin {
    counters: Mutex<HashMap<String, AtomicU64>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, tenant_id: &str, len: u64) -> u64 {
        let counters = self.counters.lock();
        if let Some(counter) = counters.get(tenant_id) {
            return counter.fetch_add(1, Ordering::Relaxed) % len;
        }
        drop(counters);
        let mut counters = self.counters.lock();
        let counter = counters
            .entry(tenant_id.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl AssignmentStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, candidates: &[Agent], task: &Task) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let mut sorted: Vec<&Agent> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        let index = self.next_index(&task.tenant_id, sorted.len() as u64);
        sorted.get(index as usize).map(|a| a.agent_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentStatus, Workload};
    use std::time::Instant;

    fn agent(id: &str) -> Agent {
        Agent {
            tenant_id: "t1".into(),
            agent_id: id.into(),
            agent_type: "worker".into(),
            connection_id: None,
            capabilities: vec![],
            status: AgentStatus::Active,
            workload: Workload::default(),
            last_seen: Instant::now(),
            heartbeat_interval_ms: 30_000,
            missed_beat_threshold: 3,
        }
    }

    fn task() -> Task {
        crate::tasks::Task::new(
            crate::tasks::NewTask {
                tenant_id: "t1".into(),
                requester_id: "r".into(),
                session_id: None,
                task_type: "x".into(),
                priority: 0,
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
    fn cycles_through_candidates_in_order() {
        let strategy = RoundRobin::new();
        let candidates = vec![agent("b"), agent("a"), agent("c")];
        let t = task();

        let picks: Vec<String> = (0..4)
            .map(|_| strategy.select(&candidates, &t).unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }
}
