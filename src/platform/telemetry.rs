//! `/metrics` endpoint (spec §6 "Counters exposed") backed by the `metrics`
//! facade and a process-wide Prometheus recorder, same axum-with-graceful-
//! shutdown shape as every other [`ServiceRegistration`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::platform::config::ObservabilitySettings;
use crate::platform::service::ServiceRegistration;

static RECORDER: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the process-wide Prometheus recorder exactly once and declares
/// the counters named in spec §6. Safe to call more than once; later calls
/// are no-ops.
fn install_recorder() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder");

            describe_gauge!("tasks_by_status", "Number of tasks currently in each status");
            describe_gauge!("agent_current_tasks", "Agent concurrent task count");
            describe_histogram!("assignment_latency_ms", "Time from task submission to slot reservation");
            describe_gauge!("queue_lag_ms", "Age of the oldest unreceived message in the task queue");
            describe_counter!("cost_usd_total", "Cumulative recorded task cost in USD");

            handle
        })
        .clone()
}

pub fn telemetry_service(settings: ObservabilitySettings) -> ServiceRegistration {
    ServiceRegistration::new(
        "telemetry",
        Arc::new(move |_ctx, token: CancellationToken| {
            let settings = settings.clone();
            tokio::spawn(async move {
                let outcome: Result<()> = async {
                    if !settings.enable_metrics {
                        return Ok(());
                    }

                    let handle = install_recorder();
                    let app = Router::new().route("/metrics", get(move || render(handle.clone())));
                    let addr = SocketAddr::from(([0, 0, 0, 0], settings.metrics_port));
                    let shutdown = token.clone();

                    let listener = tokio::net::TcpListener::bind(addr).await?;
                    info!(port = settings.metrics_port, "telemetry server started");

                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            shutdown.cancelled().await;
                            info!("shutting down telemetry server");
                        })
                        .await?;

                    Ok(())
                }
                .await;

                outcome
            })
        }),
    )
}

async fn render(handle: PrometheusHandle) -> String {
    handle.render()
}
