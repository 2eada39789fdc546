//! C7 Cost Gate (spec §4.7): two-phase pre-check/post-record budget
//! accounting per session and per tenant-day, grounded in the teacher's
//! `rate_limiting::RateLimiter` shape (a `RwLock`-guarded counter map keyed
//! by scope, checked before admission and updated after) but replacing
//! token-bucket throughput limiting with dollar-budget accounting.

mod sweeper;

pub use sweeper::spawn_budget_sweeper;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetEvent {
    Warning,
    Critical,
    Ok,
}

#[derive(Debug, Clone, Default)]
struct SessionBudget {
    spent_usd: f64,
    limit_usd: f64,
}

#[derive(Debug, Clone, Default)]
struct TenantBudget {
    spent_usd: f64,
    limit_usd: f64,
    window_day: Option<NaiveDate>,
}

pub struct CostGateConfig {
    pub warn_ratio: f64,
    pub crit_ratio: f64,
    pub default_session_limit_usd: f64,
    pub default_tenant_daily_limit_usd: f64,
}

impl Default for CostGateConfig {
    fn default() -> Self {
        Self {
            warn_ratio: 0.8,
            crit_ratio: 0.95,
            default_session_limit_usd: 50.0,
            default_tenant_daily_limit_usd: 1_000.0,
        }
    }
}

pub struct CostGate {
    sessions: RwLock<HashMap<String, SessionBudget>>,
    tenants: RwLock<HashMap<String, TenantBudget>>,
    config: CostGateConfig,
}

impl CostGate {
    pub fn new(config: CostGateConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tenants: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn register_session(&self, session_id: &str, limit_usd: Option<f64>) {
        self.sessions.write().insert(
            session_id.to_string(),
            SessionBudget {
                spent_usd: 0.0,
                limit_usd: limit_usd.unwrap_or(self.config.default_session_limit_usd),
            },
        );
    }

    pub fn register_tenant(&self, tenant_id: &str, daily_limit_usd: Option<f64>) {
        self.tenants.write().insert(
            tenant_id.to_string(),
            TenantBudget {
                spent_usd: 0.0,
                limit_usd: daily_limit_usd.unwrap_or(self.config.default_tenant_daily_limit_usd),
                window_day: Some(Utc::now().date_naive()),
            },
        );
    }

    fn session_remaining(&self, session_id: &str) -> f64 {
        self.sessions
            .read()
            .get(session_id)
            .map(|b| (b.limit_usd - b.spent_usd).max(0.0))
            .unwrap_or(self.config.default_session_limit_usd)
    }

    fn tenant_remaining(&self, tenant_id: &str, now: DateTime<Utc>) -> f64 {
        let tenants = self.tenants.read();
        match tenants.get(tenant_id) {
            Some(b) if b.window_day == Some(now.date_naive()) => (b.limit_usd - b.spent_usd).max(0.0),
            Some(b) => b.limit_usd,
            None => self.config.default_tenant_daily_limit_usd,
        }
    }

    /// spec §4.7 Pre-check: `estimated_cost <= min(session_remaining,
    /// tenant_remaining, task.cost_budget_usd)`.
    pub fn pre_check(
        &self,
        session_id: &str,
        tenant_id: &str,
        estimated_cost: f64,
        task_cost_budget_usd: f64,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let allowed = self
            .session_remaining(session_id)
            .min(self.tenant_remaining(tenant_id, now))
            .min(task_cost_budget_usd);

        if estimated_cost <= allowed {
            Ok(())
        } else {
            Err(CoreError::BudgetExceeded(format!(
                "estimated_cost={estimated_cost:.4} exceeds allowed={allowed:.4}"
            )))
        }
    }

    /// spec §4.7 Post-record: increments counters, returns the highest
    /// threshold crossed by this increment (if any) for each scope.
    pub fn post_record(
        &self,
        session_id: &str,
        tenant_id: &str,
        cost_usd: f64,
    ) -> (BudgetEvent, BudgetEvent) {
        let now = Utc::now();

        let session_event = {
            let mut sessions = self.sessions.write();
            let budget = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionBudget {
                    spent_usd: 0.0,
                    limit_usd: self.config.default_session_limit_usd,
                });
            budget.spent_usd += cost_usd;
            threshold_event(budget.spent_usd, budget.limit_usd, &self.config)
        };

        let tenant_event = {
            let mut tenants = self.tenants.write();
            let budget = tenants.entry(tenant_id.to_string()).or_insert_with(|| TenantBudget {
                spent_usd: 0.0,
                limit_usd: self.config.default_tenant_daily_limit_usd,
                window_day: Some(now.date_naive()),
            });
            if budget.window_day != Some(now.date_naive()) {
                budget.spent_usd = 0.0;
                budget.window_day = Some(now.date_naive());
            }
            budget.spent_usd += cost_usd;
            threshold_event(budget.spent_usd, budget.limit_usd, &self.config)
        };

        (session_event, tenant_event)
    }

    /// Midnight-UTC tenant window reset (spec §4.7 "counter sweeper").
    pub fn reset_expired_tenant_windows(&self, now: DateTime<Utc>) -> usize {
        let mut tenants = self.tenants.write();
        let mut reset_count = 0;
        for budget in tenants.values_mut() {
            if budget.window_day != Some(now.date_naive()) {
                budget.spent_usd = 0.0;
                budget.window_day = Some(now.date_naive());
                reset_count += 1;
            }
        }
        reset_count
    }

    pub fn session_cost_usd(&self, session_id: &str) -> f64 {
        self.sessions.read().get(session_id).map(|b| b.spent_usd).unwrap_or(0.0)
    }

    pub fn tenant_cost_usd(&self, tenant_id: &str) -> f64 {
        self.tenants.read().get(tenant_id).map(|b| b.spent_usd).unwrap_or(0.0)
    }
}

fn threshold_event(spent: f64, limit: f64, config: &CostGateConfig) -> BudgetEvent {
    if limit <= 0.0 {
        return BudgetEvent::Ok;
    }
    let ratio = spent / limit;
    if ratio >= config.crit_ratio {
        BudgetEvent::Critical
    } else if ratio >= config.warn_ratio {
        BudgetEvent::Warning
    } else {
        BudgetEvent::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_check_rejects_over_budget() {
        let gate = CostGate::new(CostGateConfig::default());
        gate.register_session("s1", Some(1.0));
        gate.register_tenant("t1", Some(100.0));

        assert!(gate.pre_check("s1", "t1", 0.5, 10.0).is_ok());
        assert!(matches!(
            gate.pre_check("s1", "t1", 5.0, 10.0),
            Err(CoreError::BudgetExceeded(_))
        ));
    }

    #[test]
    fn post_record_flags_warning_then_critical() {
        let gate = CostGate::new(CostGateConfig::default());
        gate.register_session("s1", Some(10.0));
        gate.register_tenant("t1", Some(1000.0));

        let (session_event, _) = gate.post_record("s1", "t1", 8.1);
        assert_eq!(session_event, BudgetEvent::Warning);

        let (session_event, _) = gate.post_record("s1", "t1", 0.9);
        assert_eq!(session_event, BudgetEvent::Critical);
    }
}
