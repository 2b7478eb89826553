//! Command-line surface of the control-plane binary

use clap::Parser;
use intercept_proxy::ProxyConfig;
use std::path::PathBuf;

use crate::logging::levels;
use crate::{ControlPlaneConfig, ControlPlaneError};

/// Intercept control plane: operator API, decision queue and optional embedded proxy
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address the HTTP API binds to
    #[arg(long)]
    pub bind: Option<String>,

    /// HTTP API port for REST and WebSocket endpoints [default: 8080]
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Also run the interception proxy in this process
    #[arg(long)]
    pub with_proxy: bool,

    /// Embedded proxy listen port
    #[arg(long)]
    pub proxy_port: Option<u16>,

    /// Embedded proxy admin API port
    #[arg(long)]
    pub proxy_admin_port: Option<u16>,

    /// Directory holding the CA certificate and key for the embedded proxy
    #[arg(long)]
    pub ca_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Also write JSON logs to this file, rotated daily
    #[arg(long)]
    pub log_file: Option<String>,
}

/// Defaults, then the config file, then flags.
pub fn load_config(args: &Args) -> Result<ControlPlaneConfig, ControlPlaneError> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| {
                ControlPlaneError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?
        }
        None => ControlPlaneConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }

    if args.with_proxy && config.proxy.is_none() {
        config.proxy = Some(ProxyConfig::default());
    }
    if let Some(proxy) = config.proxy.as_mut() {
        if let Some(port) = args.proxy_port {
            proxy.listen_port = port;
        }
        if let Some(port) = args.proxy_admin_port {
            proxy.admin_port = port;
        }
        if let Some(dir) = &args.ca_dir {
            proxy.certificate_config.cert_store_path = dir.display().to_string();
        }
        proxy.control_plane_url = format!("http://127.0.0.1:{}", config.http_port);
    }

    if let Some(level) = &args.log_level {
        if !levels::is_valid_level(level) {
            return Err(ControlPlaneError::Config(format!(
                "Invalid log level {:?}, expected one of {:?}",
                level,
                levels::valid_levels()
            )));
        }
        config.logging.level = level.to_lowercase();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(file) = &args.log_file {
        config.logging.log_file = Some(file.clone());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["control-plane"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = load_config(&parse(&[])).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_with_proxy_flags() {
        let config = load_config(&parse(&[
            "--http-port",
            "9000",
            "--with-proxy",
            "--proxy-port",
            "8181",
            "--ca-dir",
            "/tmp/ca",
        ]))
        .unwrap();
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.listen_port, 8181);
        assert_eq!(proxy.admin_port, 9091);
        assert_eq!(proxy.certificate_config.cert_store_path, "/tmp/ca");
        assert_eq!(config.http_port, 9000);
    }

    #[test]
    fn test_file_values_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http_port = 7000\nack_grace_ms = 500").unwrap();

        let args = parse(&["--config", file.path().to_str().unwrap(), "--log-level", "DEBUG"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.http_port, 7000);
        assert_eq!(config.ack_grace_ms, 500);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_rejects_bad_log_level() {
        assert!(load_config(&parse(&["--log-level", "loud"])).is_err());
    }
}
