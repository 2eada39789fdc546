//! Candidate filtering facade (spec §4.6, steps 1-4): the common
//! tenant/status/capability/capacity narrowing every strategy operates on.

use crate::registry::{Agent, AgentRegistry};
use crate::tasks::{RequiredCapability, Task};

pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.5;

/// Filters the registry's per-tenant agent set down to candidates eligible
/// for `task` (spec §4.6 points 1-4). Strategies never see ineligible
/// agents; they only rank what this returns.
pub fn eligible_candidates(registry: &AgentRegistry, task: &Task) -> Vec<Agent> {
    let required = &task.required_capabilities;
    registry.filter(&task.tenant_id, |agent| {
        agent.status == crate::registry::AgentStatus::Active
            && agent.has_capacity()
            && matches_all_capabilities(agent, required)
    })
}

fn matches_all_capabilities(agent: &Agent, required: &[RequiredCapability]) -> bool {
    required.iter().all(|req| {
        let floor = if req.confidence_floor > 0.0 {
            req.confidence_floor
        } else {
            DEFAULT_CONFIDENCE_FLOOR
        };
        agent.matches_required(&req.name, &req.languages, floor)
    })
}
