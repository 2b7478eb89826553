use clap::Parser;
use control_plane::cli::{load_config, Args};
use control_plane::{init_logging, ControlPlane};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging(&config.logging)?;

    println!("🚀 Control plane starting...");
    println!(
        "🌐 HTTP API will be available at: http://{}:{}",
        config.bind_address, config.http_port
    );
    println!(
        "🔌 Subscriber channel: ws://{}:{}/ws",
        config.bind_address, config.http_port
    );
    if let Some(proxy) = &config.proxy {
        println!(
            "🕵️  Embedded proxy: {}:{} (admin on {})",
            proxy.listen_address, proxy.listen_port, proxy.admin_port
        );
    }
    println!();
    println!("💡 Tip: Use --help to see all available options");
    println!();

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, stopping control plane...");
        }
    };

    let control_plane = ControlPlane::new(config)?;
    if let Err(e) = control_plane.run_until(shutdown).await {
        tracing::error!("Control plane failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
