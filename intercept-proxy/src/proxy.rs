use crate::{
    admin::{start_admin_server, Metrics},
    ca::CertificateAuthority,
    config::ProxyConfig,
    error::ProxyError,
    handlers::InterceptHandler,
    transport::HttpControlPlane,
    worker::InterceptWorker,
    Result,
};
use hudsucker::ProxyBuilder;
use intercept_common::ControlPlaneTransport;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

pub struct ProxyServer {
    config: ProxyConfig,
    ca: CertificateAuthority,
    metrics: Arc<Metrics>,
    transport: Arc<dyn ControlPlaneTransport>,
}

impl ProxyServer {
    /// Proxy that reaches the control plane over HTTP at `config.control_plane_url`.
    pub fn new(config: ProxyConfig, ca: CertificateAuthority) -> Result<Self> {
        let transport = HttpControlPlane::new(&config.control_plane_url, config.request_timeout())?;
        Ok(Self::with_transport(config, ca, Arc::new(transport)))
    }

    /// Proxy bound to an arbitrary transport, e.g. an in-process control plane.
    pub fn with_transport(
        config: ProxyConfig,
        ca: CertificateAuthority,
        transport: Arc<dyn ControlPlaneTransport>,
    ) -> Self {
        Self {
            config,
            ca,
            metrics: Arc::new(Metrics::default()),
            transport,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` completes, then stop the worker and kill any
    /// flow that is still paused.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.listen_address, self.config.listen_port)
            .parse()
            .map_err(|e| ProxyError::Configuration(format!("Invalid listen address: {}", e)))?;
        info!("Starting proxy server on {}", addr);

        let authority = self.ca.authority(self.config.certificate_config.cache_size)?;

        let (worker, outbox) = InterceptWorker::new(
            self.transport.clone(),
            self.config.poll.policy(),
            self.metrics.clone(),
            self.config.outbox_capacity,
        );

        // Start Admin Server
        let admin_port = self.config.admin_port;
        let metrics = self.metrics.clone();
        let registry = worker.registry().clone();
        tokio::spawn(async move {
            if let Err(e) = start_admin_server(admin_port, metrics, registry).await {
                error!("Admin server failed: {}", e);
            }
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });

        let handler = InterceptHandler::new(worker.clone(), self.config.body.clone());
        let worker_task = tokio::spawn(worker.run(outbox, stopped(stop_rx.clone())));

        let proxy = ProxyBuilder::new()
            .with_addr(addr)
            .with_rustls_client()
            .with_ca(authority)
            .with_http_handler(handler)
            .build();

        let served = proxy
            .start(stopped(stop_rx))
            .await
            .map_err(|e| ProxyError::Network(format!("Proxy failed: {}", e)));

        if served.is_err() {
            worker_task.abort();
        } else if worker_task.await.is_err() {
            error!("Intercept worker panicked");
        }
        info!("Proxy server stopped");
        served
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
