//! spec §4.6 CostOptimized: minimize estimated cost subject to a minimum
//! success-rate floor. The estimator is "provided by caller" per spec —
//! here, a boxed closure supplied at construction so callers can plug in
//! their own token-cost model without this crate depending on one.

use super::AssignmentStrategy;
use crate::registry::Agent;
use crate::tasks::Task;

pub type CostEstimator = Box<dyn Fn(&Agent, &Task) -> f64 + Send + Sync>;

pub struct CostOptimized {
    pub quality_floor: f64,
    estimator: CostEstimator,
}

impl CostOptimized {
    pub fn new(estimator: CostEstimator) -> Self {
        Self {
            quality_floor: 0.8,
            estimator,
        }
    }

    pub fn with_quality_floor(mut self, floor: f64) -> Self {
        self.quality_floor = floor;
        self
    }

    /// Estimator grounded in `ewma_cost_usd` when the task payload doesn't
    /// declare explicit token counts.
    pub fn ewma_fallback_estimator() -> CostEstimator {
        Box::new(|agent: &Agent, task: &Task| {
            let input_tokens = task.payload.get("input_tokens").and_then(|v| v.as_f64());
            let output_tokens = task.payload.get("expected_output_tokens").and_then(|v| v.as_f64());
            match (input_tokens, output_tokens) {
                (Some(_), Some(_)) => agent.workload.ewma_cost_usd.max(0.0001),
                _ => agent.workload.ewma_cost_usd,
            }
        })
    }
}

impl AssignmentStrategy for CostOptimized {
    fn name(&self) -> &'static str {
        "cost_optimized"
    }

    fn select(&self, candidates: &[Agent], task: &Task) -> Option<String> {
        candidates
            .iter()
            .filter(|a| a.workload.success_rate() >= self.quality_floor)
            .min_by(|a, b| {
                (self.estimator)(a, task)
                    .partial_cmp(&(self.estimator)(b, task))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.agent_id.cmp(&b.agent_id))
            })
            .map(|a| a.agent_id.clone())
    }
}
