//! spec §4.6 LeastLoaded: minimize `current_tasks / max_concurrent`; ties
//! broken by lower `ewma_latency_ms`, then agent_id.

use super::AssignmentStrategy;
use crate::registry::Agent;
use crate::tasks::Task;

#[derive(Default)]
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }

    fn load_ratio(agent: &Agent) -> f64 {
        agent.workload.current_tasks as f64 / agent.workload.max_concurrent.max(1) as f64
    }
}

impl AssignmentStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn select(&self, candidates: &[Agent], _task: &Task) -> Option<String> {
        candidates
            .iter()
            .min_by(|a, b| {
                Self::load_ratio(a)
                    .partial_cmp(&Self::load_ratio(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        a.workload
                            .ewma_latency_ms
                            .partial_cmp(&b.workload.ewma_latency_ms)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .then_with(|| a.agent_id.cmp(&b.agent_id))
            })
            .map(|a| a.agent_id.clone())
    }
}
