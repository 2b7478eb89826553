//! Fixtures shared by the cross-crate scenarios in `tests/`
//!
//! A [`Stack`] is a control plane plus an interception proxy wired to it,
//! either as two components talking HTTP (the agent deployment) or as one
//! process (the control plane's embedded mode).

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, Uri},
    Router,
};
use control_plane::{ControlPlane, ControlPlaneConfig, Coordinator};
use intercept_agent::{run_agent, Args as AgentArgs};
use intercept_proxy::ProxyConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub const POLL_INTERVAL_MS: u64 = 20;

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap_or_else(|e| panic!("no free port: {}", e))
}

/// Upstream that answers `"<METHOD> <path> x=<x header> body=<body>"` and
/// counts how many requests reached it.
pub struct Upstream {
    pub port: u16,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("upstream bind failed: {}", e));
        let port = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("upstream address: {}", e))
            .port();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let app = Router::new().fallback(move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let x = headers
                    .get("x")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-")
                    .to_string();
                format!(
                    "{} {} x={} body={}",
                    method,
                    uri.path(),
                    x,
                    String::from_utf8_lossy(&body)
                )
            }
        });
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { port, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A running control plane and proxy. Dropping it shuts both down.
pub struct Stack {
    pub control_plane_url: String,
    pub proxy_port: u16,
    pub admin_port: u16,
    pub coordinator: Arc<Coordinator>,
    _stop: watch::Sender<bool>,
    _certs: TempDir,
}

impl Stack {
    /// Control plane and agent as separate components over HTTP.
    pub async fn remote() -> anyhow::Result<Self> {
        let certs = tempfile::tempdir()?;
        let (stop, stop_rx) = watch::channel(false);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let control_plane_url = format!("http://{}", listener.local_addr()?);
        let control_plane = ControlPlane::new(ControlPlaneConfig::default())?;
        let coordinator = control_plane.coordinator();
        tokio::spawn(control_plane.serve(listener, stopped(stop_rx.clone())));

        let proxy_port = free_port();
        let admin_port = free_port();
        let args = AgentArgs {
            listen_addr: Some("127.0.0.1".to_string()),
            listen_port: Some(proxy_port),
            admin_port: Some(admin_port),
            control_plane_url: Some(control_plane_url.clone()),
            ca_dir: Some(certs.path().to_path_buf()),
            busy_poll_ms: Some(POLL_INTERVAL_MS),
            idle_poll_ms: Some(POLL_INTERVAL_MS),
            ..Default::default()
        };
        let agent_stop = stopped(stop_rx);
        tokio::spawn(async move {
            if let Err(e) = run_agent(args, agent_stop).await {
                tracing::error!("Agent failed: {}", e);
            }
        });

        let stack = Self {
            control_plane_url,
            proxy_port,
            admin_port,
            coordinator,
            _stop: stop,
            _certs: certs,
        };
        stack.wait_ready().await?;
        Ok(stack)
    }

    /// Control plane with the proxy running in-process.
    pub async fn embedded() -> anyhow::Result<Self> {
        let certs = tempfile::tempdir()?;
        let (stop, stop_rx) = watch::channel(false);

        let proxy_port = free_port();
        let admin_port = free_port();
        let mut proxy = ProxyConfig {
            listen_address: "127.0.0.1".to_string(),
            listen_port: proxy_port,
            admin_port,
            ..Default::default()
        };
        proxy.poll.busy_interval_ms = POLL_INTERVAL_MS;
        proxy.poll.idle_interval_ms = POLL_INTERVAL_MS;
        proxy.certificate_config.cert_store_path = certs.path().display().to_string();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let control_plane_url = format!("http://{}", listener.local_addr()?);
        let control_plane = ControlPlane::new(ControlPlaneConfig {
            proxy: Some(proxy),
            ..Default::default()
        })?;
        let coordinator = control_plane.coordinator();
        tokio::spawn(control_plane.serve(listener, stopped(stop_rx)));

        let stack = Self {
            control_plane_url,
            proxy_port,
            admin_port,
            coordinator,
            _stop: stop,
            _certs: certs,
        };
        stack.wait_ready().await?;
        Ok(stack)
    }

    async fn wait_ready(&self) -> anyhow::Result<()> {
        let admin = format!("http://127.0.0.1:{}/health", self.admin_port);
        let api = format!("{}/health", self.control_plane_url);
        for _ in 0..100 {
            let admin_up = reqwest::get(&admin).await.is_ok();
            let api_up = reqwest::get(&api).await.is_ok();
            if admin_up && api_up {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("stack did not come up")
    }

    /// Flip the toggle and give the worker time to pick it up.
    pub async fn set_intercept(&self, enabled: bool) {
        self.coordinator.set_toggle(enabled).await;
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS * 5)).await;
    }

    /// HTTP client routed through the proxy.
    pub fn proxied_client(&self) -> anyhow::Result<reqwest::Client> {
        let proxy = reqwest::Proxy::http(format!("http://127.0.0.1:{}", self.proxy_port))?;
        Ok(reqwest::Client::builder()
            .proxy(proxy)
            .timeout(Duration::from_secs(30))
            .build()?)
    }

    pub async fn proxy_metrics(&self) -> anyhow::Result<serde_json::Value> {
        let url = format!("http://127.0.0.1:{}/metrics", self.admin_port);
        Ok(reqwest::get(url).await?.json().await?)
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
