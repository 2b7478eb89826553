//! The intercept worker
//!
//! Request hooks hand flows to [`InterceptWorker::intercept`], which parks
//! them in the [`PendingRegistry`] and queues their snapshot for publishing.
//! A single polling loop ([`InterceptWorker::run`]) refreshes the toggle,
//! drains operator actions and applies them, then reports the outcomes.

use chrono::Utc;
use intercept_common::{
    Action, ActionKind, ActionOutcome, ControlPlaneTransport, FlowId, FlowSnapshot, InterceptToggle,
    OutcomeKind,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::admin::Metrics;
use crate::codec;
use crate::flow::FlowHandle;
use crate::registry::PendingRegistry;
use crate::schedule::PollPolicy;

/// Result of offering a flow to the worker.
pub enum Interception {
    /// Interception is off; the caller must resume the flow itself.
    PassThrough(Box<dyn FlowHandle>),
    /// The worker owns the flow until an action resolves it.
    Paused(FlowId),
}

/// What one polling cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub drained: usize,
    pub forwarded: usize,
    pub dropped: usize,
    pub stale: usize,
    pub rejected: usize,
    pub pending: usize,
    pub transport_fault: bool,
}

/// Receiving end of the snapshot queue filled by [`InterceptWorker::intercept`].
pub struct SnapshotOutbox {
    rx: mpsc::Receiver<FlowSnapshot>,
}

#[derive(Clone)]
pub struct InterceptWorker {
    transport: Arc<dyn ControlPlaneTransport>,
    registry: PendingRegistry,
    toggle: InterceptToggle,
    policy: PollPolicy,
    metrics: Arc<Metrics>,
    outbox: mpsc::Sender<FlowSnapshot>,
    // Snapshots whose publish failed; retried each cycle while still paused
    retry: Arc<Mutex<Vec<FlowSnapshot>>>,
}

impl InterceptWorker {
    pub fn new(
        transport: Arc<dyn ControlPlaneTransport>,
        policy: PollPolicy,
        metrics: Arc<Metrics>,
        outbox_capacity: usize,
    ) -> (Self, SnapshotOutbox) {
        let (tx, rx) = mpsc::channel(outbox_capacity.max(1));
        let worker = Self {
            transport,
            registry: PendingRegistry::new(),
            toggle: InterceptToggle::default(),
            policy,
            metrics,
            outbox: tx,
            retry: Arc::new(Mutex::new(Vec::new())),
        };
        (worker, SnapshotOutbox { rx })
    }

    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Last toggle value read from the control plane.
    pub fn is_enabled(&self) -> bool {
        self.toggle.is_enabled()
    }

    /// Offer a flow for interception. Never blocks on the control plane.
    pub async fn intercept(&self, flow: Box<dyn FlowHandle>) -> Interception {
        if !self.toggle.is_enabled() {
            Metrics::incr(&self.metrics.passed_through);
            return Interception::PassThrough(flow);
        }

        let id = FlowId::generate();
        let snapshot = codec::snapshot(id.clone(), flow.as_ref(), Utc::now());

        // Registered before the snapshot leaves, so an action can never
        // arrive for an id the registry has not seen.
        if let Err(flow) = self.registry.insert(id.clone(), flow) {
            error!("Flow id collision for {}, passing through", id);
            Metrics::incr(&self.metrics.passed_through);
            return Interception::PassThrough(flow);
        }
        Metrics::incr(&self.metrics.intercepted);
        info!(flow_id = %id, method = %snapshot.method, url = %snapshot.url, "Paused flow");

        if let Err(err) = self.outbox.try_send(snapshot) {
            let snapshot = match err {
                mpsc::error::TrySendError::Full(snapshot) => snapshot,
                mpsc::error::TrySendError::Closed(snapshot) => snapshot,
            };
            warn!("Snapshot outbox unavailable, deferring publish of {}", id);
            self.retry.lock().await.push(snapshot);
        }

        Interception::Paused(id)
    }

    /// Publish queued snapshots right away instead of waiting for the
    /// background publisher. Returns how many were taken off the queue.
    pub async fn flush_outbox(&self, outbox: &mut SnapshotOutbox) -> usize {
        let mut flushed = 0;
        while let Ok(snapshot) = outbox.rx.try_recv() {
            self.publish(snapshot).await;
            flushed += 1;
        }
        flushed
    }

    async fn publish(&self, snapshot: FlowSnapshot) {
        if !self.registry.contains(&snapshot.id) {
            debug!("Flow {} resolved before publish, skipping", snapshot.id);
            return;
        }
        match self.transport.publish_snapshot(&snapshot).await {
            Ok(()) => debug!("Published flow {}", snapshot.id),
            Err(e) => {
                warn!("Failed to publish flow {}: {}", snapshot.id, e);
                Metrics::incr(&self.metrics.publish_failures);
                self.retry.lock().await.push(snapshot);
            }
        }
    }

    async fn retry_publishes(&self) {
        let waiting = std::mem::take(&mut *self.retry.lock().await);
        for snapshot in waiting {
            self.publish(snapshot).await;
        }
    }

    /// Refresh the cached toggle. On failure the last known value stays.
    async fn refresh_toggle(&self) -> bool {
        match self.transport.intercept_enabled().await {
            Ok(enabled) => {
                if self.toggle.set(enabled) != enabled {
                    info!("Interception {}", if enabled { "enabled" } else { "disabled" });
                }
                true
            }
            Err(e) => {
                warn!("Failed to read intercept toggle, keeping last value: {}", e);
                Metrics::incr(&self.metrics.transport_errors);
                false
            }
        }
    }

    /// Resolve one action against the registry.
    pub fn apply_action(&self, action: Action) -> ActionOutcome {
        let Action {
            id,
            kind,
            modification,
        } = action;

        let Some(mut entry) = self.registry.take(&id) else {
            debug!("Discarding action for unknown or resolved flow {}", id);
            Metrics::incr(&self.metrics.stale_actions);
            return ActionOutcome::new(id, OutcomeKind::Stale);
        };

        match kind {
            ActionKind::Drop => {
                entry.handle.kill();
                Metrics::incr(&self.metrics.dropped);
                info!("Dropped flow {}", id);
                ActionOutcome::new(id, OutcomeKind::Dropped)
            }
            ActionKind::Forward => {
                if let Some(modification) = modification.as_ref().filter(|m| !m.is_empty()) {
                    if let Err(e) = codec::apply(modification, entry.handle.as_mut()) {
                        warn!("Rejected modification for flow {}: {}", id, e);
                        Metrics::incr(&self.metrics.rejected_actions);
                        if let Err(entry) = self.registry.restore(id.clone(), entry) {
                            entry.handle.kill();
                        }
                        return ActionOutcome::rejected(id, e.to_string());
                    }
                }
                entry.handle.resume();
                Metrics::incr(&self.metrics.forwarded);
                info!("Forwarded flow {}", id);
                ActionOutcome::new(id, OutcomeKind::Forwarded)
            }
        }
    }

    /// One polling cycle.
    pub async fn poll_once(&self) -> CycleReport {
        let mut report = CycleReport::default();
        if !self.refresh_toggle().await {
            report.transport_fault = true;
        }
        self.retry_publishes().await;

        match self.transport.drain_actions().await {
            Ok(actions) => {
                report.drained = actions.len();
                let outcomes: Vec<ActionOutcome> =
                    actions.into_iter().map(|action| self.apply_action(action)).collect();
                for outcome in &outcomes {
                    match outcome.result {
                        OutcomeKind::Forwarded => report.forwarded += 1,
                        OutcomeKind::Dropped => report.dropped += 1,
                        OutcomeKind::Stale => report.stale += 1,
                        OutcomeKind::Rejected => report.rejected += 1,
                    }
                }
                if !outcomes.is_empty() {
                    if let Err(e) = self.transport.report_outcomes(&outcomes).await {
                        warn!("Failed to report {} outcomes: {}", outcomes.len(), e);
                        Metrics::incr(&self.metrics.transport_errors);
                        report.transport_fault = true;
                    }
                }
            }
            Err(e) => {
                warn!("Failed to drain actions: {}", e);
                Metrics::incr(&self.metrics.transport_errors);
                report.transport_fault = true;
            }
        }

        report.pending = self.registry.len();
        report
    }

    /// Run the publisher and the polling loop until `shutdown` completes.
    /// Flows still paused at that point are killed.
    pub async fn run<F>(self, outbox: SnapshotOutbox, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Intercept worker started");
        let publisher = {
            let worker = self.clone();
            let mut rx = outbox.rx;
            tokio::spawn(async move {
                while let Some(snapshot) = rx.recv().await {
                    worker.publish(snapshot).await;
                }
            })
        };

        tokio::pin!(shutdown);
        let mut failures = 0u32;
        loop {
            let report = self.poll_once().await;
            failures = if report.transport_fault {
                failures.saturating_add(1)
            } else {
                0
            };
            if report.drained > 0 {
                debug!(?report, "Poll cycle");
            }

            let delay = self.policy.next_delay(report.pending, failures);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        publisher.abort();
        let abandoned = self.registry.abandon_all();
        info!("Intercept worker stopped, {} paused flows abandoned", abandoned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{HyperFlow, Verdict};
    use crate::transport::MemoryControlPlane;
    use hudsucker::hyper::{body::to_bytes, Request};
    use intercept_common::{HeaderList, Modification};
    use tokio::sync::oneshot;

    fn worker(plane: &Arc<MemoryControlPlane>) -> (InterceptWorker, SnapshotOutbox) {
        InterceptWorker::new(plane.clone(), PollPolicy::default(), Arc::new(Metrics::default()), 16)
    }

    fn request(headers: &[(&str, &str)], body: &'static [u8]) -> (Box<dyn FlowHandle>, oneshot::Receiver<Verdict>) {
        let mut builder = Request::builder().method("POST").uri("http://x/y");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (flow, rx) = HyperFlow::from_request(builder.body(()).unwrap(), body);
        (Box::new(flow), rx)
    }

    async fn pause(worker: &InterceptWorker, flow: Box<dyn FlowHandle>) -> FlowId {
        match worker.intercept(flow).await {
            Interception::Paused(id) => id,
            Interception::PassThrough(_) => panic!("expected the flow to be paused"),
        }
    }

    #[tokio::test]
    async fn test_disabled_toggle_passes_through() {
        let plane = Arc::new(MemoryControlPlane::new(false));
        let (worker, mut outbox) = worker(&plane);
        worker.poll_once().await;

        let (flow, _rx) = request(&[], b"");
        assert!(matches!(worker.intercept(flow).await, Interception::PassThrough(_)));
        assert_eq!(worker.flush_outbox(&mut outbox).await, 0);
        assert!(plane.published().await.is_empty());
        assert!(worker.registry().is_empty());
    }

    #[tokio::test]
    async fn test_pause_publishes_snapshot() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, mut outbox) = worker(&plane);
        worker.poll_once().await;

        let (flow, _rx) = request(&[("X", "1")], b"hello");
        let id = pause(&worker, flow).await;
        assert!(worker.registry().contains(&id));

        worker.flush_outbox(&mut outbox).await;
        let published = plane.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, id);
        assert_eq!(published[0].body, "hello");
        assert_eq!(published[0].headers.get("x"), Some("1"));
    }

    #[tokio::test]
    async fn test_drop_twice_kills_once() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, _outbox) = worker(&plane);
        worker.poll_once().await;

        let (flow, rx) = request(&[], b"");
        let id = pause(&worker, flow).await;
        plane.push_action(Action::new_drop(id.clone())).await;
        plane.push_action(Action::new_drop(id.clone())).await;

        let report = worker.poll_once().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.stale, 1);
        assert_eq!(report.pending, 0);
        assert!(matches!(rx.await, Ok(Verdict::Kill)));

        let outcomes = plane.outcomes().await;
        assert_eq!(outcomes[0].result, OutcomeKind::Dropped);
        assert_eq!(outcomes[1].result, OutcomeKind::Stale);
        assert_eq!(worker.metrics().snapshot(0).dropped, 1);
    }

    #[tokio::test]
    async fn test_forward_with_header_replacement() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, _outbox) = worker(&plane);
        worker.poll_once().await;

        let (flow, rx) = request(&[("A", "1"), ("B", "2")], b"");
        let id = pause(&worker, flow).await;
        let headers: HeaderList = vec![("A", "9")].into_iter().collect();
        let modification = Modification {
            headers: Some(headers),
            ..Default::default()
        };
        plane.push_action(Action::new_forward(id, Some(modification))).await;
        worker.poll_once().await;

        match rx.await.unwrap() {
            Verdict::Forward(req) => {
                assert_eq!(req.headers().len(), 1);
                assert_eq!(req.headers()["a"], "9");
            }
            Verdict::Kill => panic!("expected forward"),
        }
    }

    #[tokio::test]
    async fn test_unmodified_forward_is_byte_identical() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, _outbox) = worker(&plane);
        worker.poll_once().await;

        let (flow, rx) = request(&[("X", "1"), ("content-length", "5")], b"hello");
        let id = pause(&worker, flow).await;
        plane.push_action(Action::new_forward(id, None)).await;
        worker.poll_once().await;

        let Ok(Verdict::Forward(req)) = rx.await else {
            panic!("expected forward");
        };
        assert_eq!(req.method(), "POST");
        assert_eq!(req.uri(), "http://x/y");
        assert_eq!(req.headers()["x"], "1");
        assert_eq!(req.headers()["content-length"], "5");
        assert_eq!(&to_bytes(req.into_body()).await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn test_rejected_modification_keeps_flow_paused() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, _outbox) = worker(&plane);
        worker.poll_once().await;

        let (flow, rx) = request(&[], b"");
        let id = pause(&worker, flow).await;
        let bad = Modification {
            path: Some("not a path".into()),
            ..Default::default()
        };
        plane.push_action(Action::new_forward(id.clone(), Some(bad))).await;

        let report = worker.poll_once().await;
        assert_eq!(report.rejected, 1);
        assert!(worker.registry().contains(&id));
        let outcomes = plane.outcomes().await;
        assert_eq!(outcomes[0].result, OutcomeKind::Rejected);
        assert!(outcomes[0].reason.is_some());

        plane.push_action(Action::new_forward(id, None)).await;
        worker.poll_once().await;
        assert!(matches!(rx.await, Ok(Verdict::Forward(_))));
    }

    #[tokio::test]
    async fn test_failed_publish_is_retried_while_pending() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, mut outbox) = worker(&plane);
        worker.poll_once().await;
        plane.fail_publishes(1).await;

        let (flow, _rx) = request(&[], b"");
        let id = pause(&worker, flow).await;
        worker.flush_outbox(&mut outbox).await;
        assert!(plane.published().await.is_empty());
        assert_eq!(worker.metrics().snapshot(1).publish_failures, 1);

        worker.poll_once().await;
        let published = plane.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, id);
    }

    #[tokio::test]
    async fn test_resolved_flow_is_not_republished() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, mut outbox) = worker(&plane);
        worker.poll_once().await;
        plane.fail_publishes(1).await;

        let (flow, _rx) = request(&[], b"");
        let id = pause(&worker, flow).await;
        worker.flush_outbox(&mut outbox).await;
        worker.apply_action(Action::new_drop(id));

        worker.poll_once().await;
        assert!(plane.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_keeps_last_toggle() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, _outbox) = worker(&plane);
        assert!(!worker.poll_once().await.transport_fault);
        assert!(worker.is_enabled());

        plane.set_offline(true).await;
        let (flow, _rx) = request(&[], b"");
        let id = pause(&worker, flow).await;
        let report = worker.poll_once().await;
        assert!(report.transport_fault);
        assert!(worker.is_enabled());
        assert!(worker.registry().contains(&id));

        plane.set_offline(false).await;
        plane.set_enabled(false).await;
        worker.poll_once().await;
        assert!(!worker.is_enabled());
        // Still paused: turning interception off does not release flows.
        assert!(worker.registry().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_resolves_and_abandons_on_shutdown() {
        let plane = Arc::new(MemoryControlPlane::new(true));
        let (worker, outbox) = worker(&plane);
        worker.poll_once().await;

        let (forwarded, forwarded_rx) = request(&[], b"");
        let (abandoned, abandoned_rx) = request(&[], b"");
        let forwarded_id = pause(&worker, forwarded).await;
        pause(&worker, abandoned).await;
        plane.push_action(Action::new_forward(forwarded_id, None)).await;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(worker.clone().run(outbox, async {
            let _ = stop_rx.await;
        }));

        assert!(matches!(forwarded_rx.await, Ok(Verdict::Forward(_))));

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(matches!(abandoned_rx.await, Ok(Verdict::Kill)));
        assert!(worker.registry().is_empty());
    }
}
