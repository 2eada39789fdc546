//! spec §4.6 CapabilityMatch: score = Σ confidence of matched capabilities
//! + specialty overlap bonus; highest score wins; ties broken by LeastLoaded.

use super::least_loaded::LeastLoaded;
use super::AssignmentStrategy;
use crate::registry::Agent;
use crate::tasks::Task;

pub struct CapabilityMatch {
    pub specialty_bonus: f32,
    tie_breaker: LeastLoaded,
}

impl CapabilityMatch {
    pub fn new(specialty_bonus: f32) -> Self {
        Self {
            specialty_bonus,
            tie_breaker: LeastLoaded::new(),
        }
    }

    fn score(&self, agent: &Agent, task: &Task) -> f32 {
        task.required_capabilities
            .iter()
            .filter_map(|req| agent.capabilities.iter().find(|c| c.name == req.name))
            .map(|cap| {
                let specialty_overlap = cap
                    .specialties
                    .iter()
                    .filter(|s| task.payload.get("specialties").map_or(false, |v| {
                        v.as_array()
                            .map(|arr| arr.iter().any(|x| x.as_str() == Some(s.as_str())))
                            .unwrap_or(false)
                    }))
                    .count() as f32;
                cap.confidence + specialty_overlap * self.specialty_bonus
            })
            .sum()
    }
}

impl Default for CapabilityMatch {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl AssignmentStrategy for CapabilityMatch {
    fn name(&self) -> &'static str {
        "capability_match"
    }

    fn select(&self, candidates: &[Agent], task: &Task) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let mut best_score = f32::MIN;
        let mut tied: Vec<&Agent> = Vec::new();
        for agent in candidates {
            let score = self.score(agent, task);
            if score > best_score {
                best_score = score;
                tied.clear();
                tied.push(agent);
            } else if (score - best_score).abs() < f32::EPSILON {
                tied.push(agent);
            }
        }
        if tied.len() == 1 {
            return tied.first().map(|a| a.agent_id.clone());
        }
        let tied_owned: Vec<Agent> = tied.into_iter().cloned().collect();
        self.tie_breaker.select(&tied_owned, task)
    }
}
