//! Intercept Agent Binary
//!
//! Standalone executable that runs the intercepting proxy and talks to a
//! control plane over HTTP.

use clap::Parser;
use intercept_proxy::{CertificateAuthority, ProxyConfig, ProxyError, ProxyServer};
use std::future::Future;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML file with a full proxy configuration; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on for HTTP/HTTPS traffic [default: 127.0.0.1]
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Port to listen on for HTTP/HTTPS traffic [default: 8081]
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Port to expose the Admin API (health/metrics) [default: 9091]
    #[arg(long)]
    pub admin_port: Option<u16>,

    /// Base URL of the control plane HTTP API [default: http://127.0.0.1:8080]
    #[arg(long)]
    pub control_plane_url: Option<String>,

    /// Directory holding the CA certificate and key [default: ./certs]
    #[arg(long)]
    pub ca_dir: Option<PathBuf>,

    /// Poll delay while flows are paused, in milliseconds [default: 200]
    #[arg(long)]
    pub busy_poll_ms: Option<u64>,

    /// Poll delay while nothing is paused, in milliseconds [default: 1000]
    #[arg(long)]
    pub idle_poll_ms: Option<u64>,

    /// Largest request body that can be paused, in bytes [default: 10485760]
    #[arg(long)]
    pub max_body_size: Option<usize>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

/// Build the proxy configuration: defaults, then the config file, then flags.
pub fn load_config(args: &Args) -> Result<ProxyConfig, ProxyError> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(addr) = &args.listen_addr {
        config.listen_address = addr.clone();
    }
    if let Some(port) = args.listen_port {
        config.listen_port = port;
    }
    if let Some(port) = args.admin_port {
        config.admin_port = port;
    }
    if let Some(url) = &args.control_plane_url {
        config.control_plane_url = url.clone();
    }
    if let Some(dir) = &args.ca_dir {
        config.certificate_config.cert_store_path = dir.display().to_string();
    }
    if let Some(ms) = args.busy_poll_ms {
        config.poll.busy_interval_ms = ms;
    }
    if let Some(ms) = args.idle_poll_ms {
        config.poll.idle_interval_ms = ms;
    }
    if let Some(size) = args.max_body_size {
        config.body.max_body_size = size;
    }

    if config.control_plane_url.trim().is_empty() {
        return Err(ProxyError::Configuration("control plane URL is empty".to_string()));
    }
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<ProxyConfig, ProxyError> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| {
        ProxyError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
    })
}

pub async fn run_agent<F>(args: Args, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    // Logging should be initialized by the caller (main or test)
    let config = load_config(&args)?;

    tracing::info!("Starting Intercept Agent...");
    tracing::info!("  Listen:        {}:{}", config.listen_address, config.listen_port);
    tracing::info!("  Admin:         0.0.0.0:{}", config.admin_port);
    tracing::info!("  Control plane: {}", config.control_plane_url);

    let ca = CertificateAuthority::new(Path::new(&config.certificate_config.cert_store_path))?;
    tracing::info!("CA certificate: {}", ca.cert_path().display());

    let proxy_server = ProxyServer::new(config, ca)?;
    proxy_server
        .run_until(shutdown)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
}
