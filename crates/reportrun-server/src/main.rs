//! ReportRun Delivery Server

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod admission;
mod config;
mod http;
mod metrics;
mod pipeline;
mod state;

use config::ServerConfig;
use pipeline::StubPipeline;
use state::AppState;

/// ReportRun delivery server.
#[derive(Parser)]
#[command(name = "reportrun-server")]
#[command(about = "Task admission and delivery server", long_about = None)]
struct Args {
    /// HTTP bind address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: args.bind,
        ..ServerConfig::default()
    };
    let addr: SocketAddr = config.bind_addr.parse()?;

    let state = AppState::new(config, Arc::new(StubPipeline::default()));
    let router = http::create_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
