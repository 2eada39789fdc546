pub mod capability_match;
pub mod cost_optimized;
pub mod least_loaded;
pub mod performance_based;
pub mod round_robin;

use crate::registry::Agent;
use crate::tasks::Task;

/// Uniform contract every strategy implements (spec §4.6): given agents that
/// already passed the eligibility filter, pick one. `None` means the
/// strategy itself found nothing rankable (empty `candidates`); the engine
/// distinguishes this from a post-filter empty set at the caller.
pub trait AssignmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn select(&self, candidates: &[Agent], task: &Task) -> Option<String>;
}

pub fn tie_break_by_agent_id<'a>(agents: impl Iterator<Item = &'a Agent>) -> Option<&'a Agent> {
    agents.min_by(|a, b| a.agent_id.cmp(&b.agent_id))
}
