//! Intercept control plane
//!
//! Holds the authoritative intercept toggle, collects snapshots published by
//! the proxy, fans them out to operator sessions and queues the operator's
//! decisions until the proxy drains them.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod board;
pub mod cli;
pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod http;
pub mod logging;
pub mod queue;
pub mod repeater;
pub mod ws;

pub use board::{BoardEntry, FlowStatus, InterceptBoard};
pub use coordinator::{Coordinator, CoordinatorStats};
pub use error::ControlPlaneError;
pub use fanout::{Fanout, SubscriberId};
pub use http::{router, AppState};
pub use logging::{init_logging, LoggingConfig};
pub use queue::{ActionQueue, AwaitingAck};
pub use repeater::{Repeater, RepeaterRequest, RepeaterResponse};

use intercept_proxy::{CertificateAuthority, ProxyConfig, ProxyServer};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub bind_address: String,
    pub http_port: u16,
    /// Outbound queue length per subscriber before it is disconnected
    pub subscriber_buffer: usize,
    /// How long a drained decision may stay unacknowledged
    pub ack_grace_ms: u64,
    pub sweep_interval_ms: u64,
    pub repeater_timeout_ms: u64,
    pub logging: LoggingConfig,
    /// Run the interception proxy in-process when set
    pub proxy: Option<ProxyConfig>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            subscriber_buffer: 256,
            ack_grace_ms: 10_000,
            sweep_interval_ms: 5_000,
            repeater_timeout_ms: 30_000,
            logging: LoggingConfig::default(),
            proxy: None,
        }
    }
}

impl ControlPlaneConfig {
    pub fn ack_grace(&self) -> Duration {
        Duration::from_millis(self.ack_grace_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn repeater_timeout(&self) -> Duration {
        Duration::from_millis(self.repeater_timeout_ms)
    }
}

pub struct ControlPlane {
    config: ControlPlaneConfig,
    coordinator: Arc<Coordinator>,
    repeater: Arc<Repeater>,
}

impl ControlPlane {
    pub fn new(config: ControlPlaneConfig) -> Result<Self, ControlPlaneError> {
        let repeater = Repeater::new(config.repeater_timeout())?;
        Ok(Self {
            coordinator: Arc::new(Coordinator::new(config.subscriber_buffer)),
            repeater: Arc::new(repeater),
            config,
        })
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    pub fn router(&self) -> axum::Router {
        router(AppState {
            coordinator: self.coordinator.clone(),
            repeater: self.repeater.clone(),
        })
    }

    /// Bind the configured address and serve until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ControlPlaneError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| ControlPlaneError::Config(format!("Invalid bind address: {}", e)))?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener. The unconfirmed-decision sweeper
    /// and, when configured, the embedded proxy run alongside and stop with
    /// the server.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ControlPlaneError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });

        let sweeper = tokio::spawn(sweep_unconfirmed(
            self.coordinator.clone(),
            self.config.sweep_interval(),
            self.config.ack_grace(),
            stopped(stop_rx.clone()),
        ));

        let proxy_task = match self.config.proxy.clone() {
            Some(proxy_config) => Some(spawn_embedded_proxy(
                proxy_config,
                self.coordinator.clone(),
                stopped(stop_rx.clone()),
            )?),
            None => None,
        };

        info!("HTTP API listening on http://{}", listener.local_addr()?);
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(stopped(stop_rx))
            .await;

        sweeper.abort();
        if let Some(task) = proxy_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(ControlPlaneError::Proxy(e.to_string())),
            }
        }
        served?;
        Ok(())
    }
}

fn spawn_embedded_proxy<F>(
    config: ProxyConfig,
    coordinator: Arc<Coordinator>,
    shutdown: F,
) -> Result<JoinHandle<Result<(), ControlPlaneError>>, ControlPlaneError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ca = CertificateAuthority::new(Path::new(&config.certificate_config.cert_store_path))
        .map_err(|e| ControlPlaneError::Proxy(e.to_string()))?;
    info!(
        "Embedded proxy on {}:{} (CA certificate: {})",
        config.listen_address,
        config.listen_port,
        ca.cert_path().display()
    );

    let proxy = ProxyServer::with_transport(config, ca, coordinator);
    Ok(tokio::spawn(async move {
        proxy.run_until(shutdown).await.map_err(|e| {
            error!("Embedded proxy failed: {}", e);
            ControlPlaneError::Proxy(e.to_string())
        })
    }))
}

async fn sweep_unconfirmed<F>(coordinator: Arc<Coordinator>, every: Duration, grace: Duration, stop: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(stop);
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                coordinator.sweep_unconfirmed(grace).await;
            }
        }
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
