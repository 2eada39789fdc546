//! Midnight-UTC tenant budget window reset (spec §4.7 "counter sweeper"),
//! same cancellable-interval shape as [`crate::registry::sweeper`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::CostGate;

pub fn spawn_budget_sweeper(
    gate: Arc<CostGate>,
    poll_interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("cost gate sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let reset = gate.reset_expired_tenant_windows(chrono::Utc::now());
                    if reset > 0 {
                        info!(count = reset, "tenant budget windows reset");
                    }
                }
            }
        }
    })
}
