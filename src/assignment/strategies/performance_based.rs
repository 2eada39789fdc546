//! spec §4.6 PerformanceBased: `score = w1*success_rate - w2*normalized_latency`.

use super::AssignmentStrategy;
use crate::registry::Agent;
use crate::tasks::Task;

pub struct PerformanceBased {
    pub success_weight: f64,
    pub latency_weight: f64,
    /// Latency (ms) considered "fully bad" for normalization; agents at or
    /// above this contribute the maximum latency penalty.
    pub latency_normalization_ms: f64,
}

impl Default for PerformanceBased {
    fn default() -> Self {
        Self {
            success_weight: 0.7,
            latency_weight: 0.3,
            latency_normalization_ms: 5_000.0,
        }
    }
}

impl PerformanceBased {
    fn score(&self, agent: &Agent) -> f64 {
        let success_rate = agent.workload.success_rate();
        let normalized_latency =
            (agent.workload.ewma_latency_ms / self.latency_normalization_ms).min(1.0);
        self.success_weight * success_rate - self.latency_weight * normalized_latency
    }
}

impl AssignmentStrategy for PerformanceBased {
    fn name(&self) -> &'static str {
        "performance_based"
    }

    fn select(&self, candidates: &[Agent], _task: &Task) -> Option<String> {
        candidates
            .iter()
            .max_by(|a, b| {
                self.score(a)
                    .partial_cmp(&self.score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.agent_id.cmp(&b.agent_id))
            })
            .map(|a| a.agent_id.clone())
    }
}
