//! Control plane transports used by the worker

use async_trait::async_trait;
use intercept_common::{
    Action, ActionOutcome, ControlPlaneTransport, FlowSnapshot, ToggleState, TransportError,
};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProxyError;
use crate::Result;

/// Talks to a remote control plane over its HTTP API.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> std::result::Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, TransportError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        Self::check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn post_json<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> std::result::Result<(), TransportError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }
}

#[async_trait]
impl ControlPlaneTransport for HttpControlPlane {
    async fn intercept_enabled(&self) -> std::result::Result<bool, TransportError> {
        let state: ToggleState = self.get_json("/api/intercept/status").await?;
        Ok(state.enabled)
    }

    async fn publish_snapshot(&self, snapshot: &FlowSnapshot) -> std::result::Result<(), TransportError> {
        self.post_json("/api/intercept/new", snapshot).await?;
        debug!("Published snapshot {}", snapshot.id);
        Ok(())
    }

    async fn drain_actions(&self) -> std::result::Result<Vec<Action>, TransportError> {
        self.get_json("/api/intercept/actions").await
    }

    async fn report_outcomes(&self, outcomes: &[ActionOutcome]) -> std::result::Result<(), TransportError> {
        self.post_json("/api/intercept/outcomes", outcomes).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    enabled: bool,
    offline: bool,
    failing_publishes: u32,
    published: Vec<FlowSnapshot>,
    queue: VecDeque<Action>,
    outcomes: Vec<ActionOutcome>,
}

/// In-process stand-in for a control plane, with scriptable faults.
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    state: Mutex<MemoryState>,
}

impl MemoryControlPlane {
    pub fn new(enabled: bool) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                enabled,
                ..Default::default()
            }),
        }
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.state.lock().await.enabled = enabled;
    }

    /// While offline every call fails with [`TransportError::Unreachable`].
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Make the next `count` publishes fail.
    pub async fn fail_publishes(&self, count: u32) {
        self.state.lock().await.failing_publishes = count;
    }

    pub async fn push_action(&self, action: Action) {
        self.state.lock().await.queue.push_back(action);
    }

    pub async fn published(&self) -> Vec<FlowSnapshot> {
        self.state.lock().await.published.clone()
    }

    pub async fn outcomes(&self) -> Vec<ActionOutcome> {
        self.state.lock().await.outcomes.clone()
    }

    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}

fn offline() -> TransportError {
    TransportError::Unreachable("control plane offline".to_string())
}

#[async_trait]
impl ControlPlaneTransport for MemoryControlPlane {
    async fn intercept_enabled(&self) -> std::result::Result<bool, TransportError> {
        let state = self.state.lock().await;
        if state.offline {
            return Err(offline());
        }
        Ok(state.enabled)
    }

    async fn publish_snapshot(&self, snapshot: &FlowSnapshot) -> std::result::Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(offline());
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(TransportError::Rejected {
                status: 503,
                message: "publish refused".to_string(),
            });
        }
        state.published.push(snapshot.clone());
        Ok(())
    }

    async fn drain_actions(&self) -> std::result::Result<Vec<Action>, TransportError> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(offline());
        }
        Ok(state.queue.drain(..).collect())
    }

    async fn report_outcomes(&self, outcomes: &[ActionOutcome]) -> std::result::Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(offline());
        }
        state.outcomes.extend_from_slice(outcomes);
        Ok(())
    }
}
