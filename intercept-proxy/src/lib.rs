//! Intercept Proxy Library
//!
//! MITM proxy side of the intercept system: pauses flows while interception
//! is on, publishes their snapshots to the control plane and resumes or
//! kills them as operator actions come back.

pub mod admin;
pub mod ca;
pub mod codec;
pub mod flow;
pub mod handlers;
pub mod proxy;
pub mod registry;
pub mod schedule;
pub mod transport;
pub mod worker;

/// Configuration types and utilities
pub mod config;

/// Error types for proxy operations
pub mod error;

pub use admin::{Metrics, MetricsResponse};
pub use ca::CertificateAuthority;
pub use config::{BodyLimits, CertificateConfig, PollConfig, ProxyConfig};
pub use error::{FlowError, ProxyError};
pub use flow::{FlowHandle, HyperFlow, Verdict};
pub use handlers::InterceptHandler;
pub use proxy::ProxyServer;
pub use registry::{PendingInfo, PendingRegistry};
pub use schedule::PollPolicy;
pub use transport::{HttpControlPlane, MemoryControlPlane};
pub use worker::{CycleReport, InterceptWorker, Interception, SnapshotOutbox};

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
