//! Configuration types and utilities

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::schedule::PollPolicy;

/// Proxy startup configuration. Nothing here changes at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address to listen on
    pub listen_address: String,
    /// Port to listen on
    pub listen_port: u16,
    /// Admin API port
    pub admin_port: u16,
    /// Base URL of the control plane HTTP API
    pub control_plane_url: String,
    /// Per-call timeout towards the control plane
    pub request_timeout_ms: u64,
    /// Capacity of the snapshot outbox between request hooks and the publisher
    pub outbox_capacity: usize,
    pub poll: PollConfig,
    pub body: BodyLimits,
    pub certificate_config: CertificateConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: 8081,
            admin_port: 9091,
            control_plane_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_ms: 5_000,
            outbox_capacity: 1024,
            poll: PollConfig::default(),
            body: BodyLimits::default(),
            certificate_config: CertificateConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Worker polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between cycles while flows are paused
    pub busy_interval_ms: u64,
    /// Delay between cycles while nothing is paused
    pub idle_interval_ms: u64,
    /// Upper bound on the delay after consecutive transport failures
    pub max_backoff_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            busy_interval_ms: 200,
            idle_interval_ms: 1_000,
            max_backoff_ms: 5_000,
        }
    }
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.busy_interval_ms),
            Duration::from_millis(self.idle_interval_ms),
        )
        .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
    }
}

/// Limits applied while buffering a request body before it is paused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyLimits {
    /// Bodies declared larger than this are never paused
    pub max_body_size: usize,
    /// Time allowed for the whole body to arrive
    pub read_timeout_ms: u64,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
            read_timeout_ms: 30_000,
        }
    }
}

impl BodyLimits {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Certificate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Directory holding ca.pem / ca.key / ca.crt
    pub cert_store_path: String,
    /// Number of leaf certificates kept by the MITM authority
    pub cache_size: u64,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            cert_store_path: "./certs".to_string(),
            cache_size: 1000,
        }
    }
}
