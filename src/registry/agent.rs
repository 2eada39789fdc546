//! Agent data model (spec §3 "Agent", §4.4).

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub confidence: f32,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl Capability {
    pub fn clamp_confidence(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Active,
    Draining,
    Inactive,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workload {
    pub current_tasks: u32,
    pub max_concurrent: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub ewma_latency_ms: f64,
    pub ewma_cost_usd: f64,
}

impl Workload {
    /// Default EWMA smoothing factor (spec §4.4 "α for EWMA configurable").
    pub const DEFAULT_ALPHA: f64 = 0.2;

    fn update_ewma(current: f64, sample: f64, alpha: f64) -> f64 {
        if current == 0.0 {
            sample
        } else {
            alpha * sample + (1.0 - alpha) * current
        }
    }

    pub fn observe(&mut self, latency_ms: Option<f64>, cost_usd: Option<f64>, alpha: f64) {
        if let Some(latency) = latency_ms {
            self.ewma_latency_ms = Self::update_ewma(self.ewma_latency_ms, latency, alpha);
        }
        if let Some(cost) = cost_usd {
            self.ewma_cost_usd = Self::update_ewma(self.ewma_cost_usd, cost, alpha);
        }
    }

    pub fn success_rate(&self) -> f64 {
        self.success_count as f64 / (self.success_count + self.failure_count + 1) as f64
    }
}

/// A live agent record, owned exclusively by the [`crate::registry::AgentRegistry`]
/// (spec §3 Lifecycle & Ownership: the Connection Manager holds only a weak
/// `agent_id` reference).
#[derive(Debug, Clone)]
pub struct Agent {
    pub tenant_id: String,
    pub agent_id: String,
    pub agent_type: String,
    pub connection_id: Option<u64>,
    pub capabilities: Vec<Capability>,
    pub status: AgentStatus,
    pub workload: Workload,
    pub last_seen: Instant,
    pub heartbeat_interval_ms: u64,
    pub missed_beat_threshold: u32,
}

impl Agent {
    /// spec invariant 7: agent is lost if `now - last_seen >
    /// missed_beats * heartbeat_interval`.
    pub fn is_lost(&self, now: Instant) -> bool {
        let threshold_ms = self.heartbeat_interval_ms * self.missed_beat_threshold as u64;
        now.saturating_duration_since(self.last_seen).as_millis() as u64 > threshold_ms
    }

    pub fn has_capacity(&self) -> bool {
        self.workload.current_tasks < self.workload.max_concurrent
    }

    pub fn matches_required(
        &self,
        name: &str,
        languages: &[String],
        confidence_floor: f32,
    ) -> bool {
        self.capabilities.iter().any(|cap| {
            cap.name == name
                && cap.confidence >= confidence_floor
                && (languages.is_empty()
                    || languages.iter().any(|lang| cap.languages.contains(lang)))
        })
    }
}
