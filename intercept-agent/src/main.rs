//! Intercept Agent Binary Entry Point

use clap::Parser;
use intercept_agent::{run_agent, Args};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hudsucker=warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, stopping proxy server...");
        }
    };

    if let Err(e) = run_agent(args, shutdown).await {
        tracing::error!("Proxy server failed: {}", e);
        return Err(e);
    }

    Ok(())
}
