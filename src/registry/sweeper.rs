//! Background liveness sweep (spec §4.4 `Sweeper`, P8), grounded in the
//! teacher's `telemetry_service` spawn-loop shape: a cancellable tokio task
//! polling on a fixed interval, reporting via `tracing`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::AgentRegistry;

/// Spawns the sweep loop; cancelled via `token`. Interval is independent of
/// any single agent's heartbeat interval — it just needs to be frequent
/// enough that a lost agent is caught within its own missed-beat window.
pub fn spawn_sweeper(
    registry: AgentRegistry,
    poll_interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("agent registry sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let lost = registry.sweep_lost_agents();
                    if !lost.is_empty() {
                        warn!(count = lost.len(), "agents marked inactive by sweeper");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteerableClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn sweeper_stops_on_cancellation() {
        let clock = Arc::new(SteerableClock::new());
        let registry = AgentRegistry::new(clock);
        let token = CancellationToken::new();
        let handle = spawn_sweeper(registry, Duration::from_millis(10), token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper task should exit promptly")
            .expect("sweeper task should not panic");
    }
}
