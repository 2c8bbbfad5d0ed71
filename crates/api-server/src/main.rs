//! API Server binary entrypoint.

use api_server::{ApiServer, ServerConfig};
use clap::Parser;
use exchange_core::config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "api-server", about = "Futures guard API and reconciler")]
struct Args {
    /// Configuration file (defaults to $GUARD_CONFIG or guard.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override.
    #[arg(short, long)]
    port: Option<u16>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "api_server=info,trading_engine=info,risk_manager=info,exchange_core=info,tower_http=info".into()
        }))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    let args = Args::parse();
    let app_config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let mut server_config = ServerConfig::from_env();
    if let Some(port) = args.port {
        server_config.port = port;
    }

    tracing::info!(
        interval_secs = app_config.reconciler.interval_secs,
        strike_limit = app_config.reconciler.strike_limit,
        hedge_mode = app_config.paper.hedge_mode,
        "Configuration loaded"
    );

    ApiServer::new(server_config, &app_config)
        .run(shutdown_signal())
        .await
}
