//! Control-plane side of the intercept protocol
//!
//! The coordinator owns the authoritative toggle, the intercept board, the
//! action queue and the subscriber fan-out. It never holds a live flow: the
//! proxy reaches it only through [`ControlPlaneTransport`], either over HTTP
//! or in-process in embedded mode.

use async_trait::async_trait;
use intercept_common::{
    Action, ActionKind, ActionOutcome, ControlPlaneTransport, FlowId, FlowSnapshot,
    InterceptToggle, OutcomeKind, ServerMessage, TransportError,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::board::{BoardEntry, FlowStatus, InterceptBoard};
use crate::error::ControlPlaneError;
use crate::fanout::{Fanout, SubscriberId};
use crate::queue::ActionQueue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub enabled: bool,
    pub subscribers: usize,
    pub queued_actions: usize,
    pub awaiting_ack: usize,
    pub unconfirmed_decisions: u64,
    pub stale_outcomes: u64,
    pub view_size: usize,
    pub log_size: usize,
}

pub struct Coordinator {
    toggle: InterceptToggle,
    board: Mutex<InterceptBoard>,
    queue: Mutex<ActionQueue>,
    fanout: Fanout,
    unconfirmed: AtomicU64,
    stale_outcomes: AtomicU64,
}

impl Coordinator {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            toggle: InterceptToggle::default(),
            board: Mutex::new(InterceptBoard::new()),
            queue: Mutex::new(ActionQueue::new()),
            fanout: Fanout::new(subscriber_buffer),
            unconfirmed: AtomicU64::new(0),
            stale_outcomes: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.toggle.is_enabled()
    }

    /// Store the toggle and tell every subscriber. Returns the previous value.
    pub async fn set_toggle(&self, enabled: bool) -> bool {
        let previous = self.toggle.set(enabled);
        if previous != enabled {
            info!(enabled, "Intercept toggled");
        }
        self.fanout
            .broadcast(ServerMessage::InterceptStatus { enabled })
            .await;
        previous
    }

    /// Log and broadcast a snapshot from the proxy. Redelivery of an id
    /// already on the board is accepted but not broadcast again.
    pub async fn record_snapshot(&self, snapshot: FlowSnapshot) -> bool {
        // Held through the broadcast so subscribers see log order.
        let mut board = self.board.lock().await;
        if !board.record(snapshot.clone()) {
            debug!(flow_id = %snapshot.id, "Ignoring repeated snapshot");
            return false;
        }
        info!(
            flow_id = %snapshot.id,
            method = %snapshot.method,
            url = %snapshot.url,
            "Flow intercepted"
        );
        self.fanout
            .broadcast(ServerMessage::Intercepted { data: snapshot })
            .await;
        drop(board);
        true
    }

    /// Queue an operator decision. Ids that are unknown or already decided
    /// are still queued; the proxy answers them as stale, and the board keeps
    /// the first decision.
    pub async fn submit_action(&self, action: Action) -> Result<(), ControlPlaneError> {
        action.validate()?;

        let status = match action.kind {
            ActionKind::Forward => FlowStatus::Forwarded,
            ActionKind::Drop => FlowStatus::Dropped,
        };
        let id = action.id.clone();

        let mut queue = self.queue.lock().await;
        queue.push(action);
        let first = self.board.lock().await.decide(&id, status);
        drop(queue);

        if first {
            info!(flow_id = %id, ?status, "Decision queued");
        } else {
            info!(flow_id = %id, ?status, "Decision queued for a flow not pending on the board");
        }
        Ok(())
    }

    /// Hand every queued action to the proxy, oldest first.
    pub async fn take_actions(&self) -> Vec<Action> {
        let actions = self.queue.lock().await.drain(Instant::now());
        if !actions.is_empty() {
            debug!(count = actions.len(), "Actions drained");
        }
        actions
    }

    /// Apply the proxy's acknowledgements. Returns how many matched a
    /// drained action.
    pub async fn record_outcomes(&self, outcomes: &[ActionOutcome]) -> usize {
        let mut acknowledged = 0;
        let mut rejections = Vec::new();
        {
            let mut queue = self.queue.lock().await;
            let mut board = self.board.lock().await;
            for outcome in outcomes {
                if queue.acknowledge(&outcome.id) {
                    acknowledged += 1;
                }
                match outcome.result {
                    OutcomeKind::Forwarded => {
                        board.set_status(&outcome.id, FlowStatus::Forwarded);
                    }
                    OutcomeKind::Dropped => {
                        board.set_status(&outcome.id, FlowStatus::Dropped);
                    }
                    OutcomeKind::Stale => {
                        self.stale_outcomes.fetch_add(1, Ordering::Relaxed);
                        debug!(flow_id = %outcome.id, "Stale decision discarded by proxy");
                    }
                    OutcomeKind::Rejected => {
                        board.set_status(&outcome.id, FlowStatus::Pending);
                        rejections.push(outcome.clone());
                    }
                }
            }
        }

        for outcome in rejections {
            let reason = outcome.reason.unwrap_or_else(|| "unknown reason".to_string());
            warn!(flow_id = %outcome.id, %reason, "Proxy rejected modification");
            self.fanout
                .broadcast(ServerMessage::Error {
                    message: format!("modification for {} rejected: {}", outcome.id, reason),
                })
                .await;
        }
        acknowledged
    }

    /// Warn about decisions drained longer than `grace` ago that the proxy
    /// never acknowledged.
    pub async fn sweep_unconfirmed(&self, grace: Duration) -> usize {
        let expired = self.queue.lock().await.sweep(Instant::now(), grace);
        for entry in &expired {
            warn!(
                flow_id = %entry.id,
                kind = ?entry.kind,
                "Decision drained but never acknowledged by the proxy"
            );
        }
        self.unconfirmed
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub async fn remove_from_view(&self, id: &FlowId) -> bool {
        self.board.lock().await.remove(id)
    }

    pub async fn view(&self) -> Vec<BoardEntry> {
        self.board.lock().await.view().to_vec()
    }

    /// Every snapshot recorded so far, in arrival order.
    pub async fn log(&self) -> Vec<FlowSnapshot> {
        self.board.lock().await.log().to_vec()
    }

    /// New subscribers are told the toggle value before anything else.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<ServerMessage>) {
        let toggle = self.toggle.clone();
        self.fanout
            .subscribe(move || {
                vec![ServerMessage::InterceptStatus {
                    enabled: toggle.is_enabled(),
                }]
            })
            .await
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.fanout.unsubscribe(id).await;
    }

    pub async fn send_to(&self, id: SubscriberId, message: ServerMessage) -> bool {
        self.fanout.send_to(id, message).await
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let (queued_actions, awaiting_ack) = {
            let queue = self.queue.lock().await;
            (queue.queued_len(), queue.awaiting_len())
        };
        let (view_size, log_size) = {
            let board = self.board.lock().await;
            (board.view().len(), board.log().len())
        };
        CoordinatorStats {
            enabled: self.is_enabled(),
            subscribers: self.fanout.len().await,
            queued_actions,
            awaiting_ack,
            unconfirmed_decisions: self.unconfirmed.load(Ordering::Relaxed),
            stale_outcomes: self.stale_outcomes.load(Ordering::Relaxed),
            view_size,
            log_size,
        }
    }
}

/// In-process transport used when the proxy runs inside the control plane.
#[async_trait]
impl ControlPlaneTransport for Coordinator {
    async fn intercept_enabled(&self) -> Result<bool, TransportError> {
        Ok(self.is_enabled())
    }

    async fn publish_snapshot(&self, snapshot: &FlowSnapshot) -> Result<(), TransportError> {
        self.record_snapshot(snapshot.clone()).await;
        Ok(())
    }

    async fn drain_actions(&self) -> Result<Vec<Action>, TransportError> {
        Ok(self.take_actions().await)
    }

    async fn report_outcomes(&self, outcomes: &[ActionOutcome]) -> Result<(), TransportError> {
        self.record_outcomes(outcomes).await;
        Ok(())
    }
}
