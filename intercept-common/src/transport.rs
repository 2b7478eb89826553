//! Narrow contract between the proxy and the control plane
//!
//! The proxy only ever reads the toggle, publishes snapshots, drains actions
//! and reports what it did with them. Whether that goes over HTTP, an
//! in-process call or a test fake is up to the implementation.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::action::{Action, ActionOutcome};
use crate::snapshot::FlowSnapshot;

/// Transport faults. All of them are transient from the proxy's point of view.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("control plane unreachable: {0}")]
    Unreachable(String),
    #[error("control plane answered {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed control plane payload: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ControlPlaneTransport: Send + Sync {
    /// Current toggle value as seen by the control plane.
    async fn intercept_enabled(&self) -> Result<bool, TransportError>;

    /// Hand a freshly paused flow to the control plane.
    async fn publish_snapshot(&self, snapshot: &FlowSnapshot) -> Result<(), TransportError>;

    /// Take every queued action, oldest first. A returned action is not
    /// returned again by a later call.
    async fn drain_actions(&self) -> Result<Vec<Action>, TransportError>;

    /// Acknowledge drained actions.
    async fn report_outcomes(&self, outcomes: &[ActionOutcome]) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: ControlPlaneTransport + ?Sized> ControlPlaneTransport for Arc<T> {
    async fn intercept_enabled(&self) -> Result<bool, TransportError> {
        (**self).intercept_enabled().await
    }

    async fn publish_snapshot(&self, snapshot: &FlowSnapshot) -> Result<(), TransportError> {
        (**self).publish_snapshot(snapshot).await
    }

    async fn drain_actions(&self) -> Result<Vec<Action>, TransportError> {
        (**self).drain_actions().await
    }

    async fn report_outcomes(&self, outcomes: &[ActionOutcome]) -> Result<(), TransportError> {
        (**self).report_outcomes(outcomes).await
    }
}
