use std::net::SocketAddr;

use agentmesh_core::platform::PlatformConfig;
use agentmesh_core::transport::{submit_task_handler, ws_upgrade_handler};
use agentmesh_core::Platform;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path, layered on top of configs/platform.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Port to bind the agent WebSocket listener to.
    #[arg(short, long, default_value = "7800")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let config = PlatformConfig::load_from_path(args.config)?;
    let runtime = Platform::new(config).start().await?;

    let app = Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .with_state(runtime.context().connections())
        .merge(
            Router::new()
                .route("/tasks", post(submit_task_handler))
                .with_state(runtime.context()),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "agentmesh server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    runtime.shutdown().await
}
