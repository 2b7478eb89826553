//! FIFO of operator decisions waiting for the worker

use intercept_common::{Action, ActionKind, FlowId};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// A drained action the worker has not acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwaitingAck {
    pub id: FlowId,
    pub kind: ActionKind,
    #[serde(skip)]
    pub drained_at: Instant,
}

#[derive(Debug, Default)]
pub struct ActionQueue {
    queued: VecDeque<Action>,
    awaiting: Vec<AwaitingAck>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicates are kept; the worker answers the second one as stale.
    pub fn push(&mut self, action: Action) {
        self.queued.push_back(action);
    }

    /// Take everything queued, oldest first. Each action is returned once.
    pub fn drain(&mut self, now: Instant) -> Vec<Action> {
        let drained: Vec<Action> = self.queued.drain(..).collect();
        self.awaiting.extend(drained.iter().map(|action| AwaitingAck {
            id: action.id.clone(),
            kind: action.kind,
            drained_at: now,
        }));
        drained
    }

    /// Clear the oldest awaiting entry for `id`.
    pub fn acknowledge(&mut self, id: &FlowId) -> bool {
        match self.awaiting.iter().position(|entry| &entry.id == id) {
            Some(index) => {
                self.awaiting.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return entries drained longer than `grace` ago.
    pub fn sweep(&mut self, now: Instant, grace: Duration) -> Vec<AwaitingAck> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .awaiting
            .drain(..)
            .partition(|entry| now.saturating_duration_since(entry.drained_at) > grace);
        self.awaiting = kept;
        expired
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn awaiting_len(&self) -> usize {
        self.awaiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_drain_once() {
        let mut queue = ActionQueue::new();
        queue.push(Action::new_drop(FlowId::from("1")));
        queue.push(Action::new_forward(FlowId::from("2"), None));
        queue.push(Action::new_drop(FlowId::from("1")));

        let now = Instant::now();
        let drained = queue.drain(now);
        let ids: Vec<&str> = drained.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "1"]);
        assert!(queue.drain(now).is_empty());
        assert_eq!(queue.queued_len(), 0);
        assert_eq!(queue.awaiting_len(), 3);
    }

    #[test]
    fn test_acknowledge_clears_one_entry() {
        let mut queue = ActionQueue::new();
        queue.push(Action::new_drop(FlowId::from("1")));
        queue.push(Action::new_drop(FlowId::from("1")));
        queue.drain(Instant::now());

        assert!(queue.acknowledge(&FlowId::from("1")));
        assert_eq!(queue.awaiting_len(), 1);
        assert!(queue.acknowledge(&FlowId::from("1")));
        assert!(!queue.acknowledge(&FlowId::from("1")));
    }

    #[test]
    fn test_sweep_only_expired() {
        let mut queue = ActionQueue::new();
        let start = Instant::now();
        queue.push(Action::new_drop(FlowId::from("old")));
        queue.drain(start);
        queue.push(Action::new_drop(FlowId::from("new")));
        queue.drain(start + Duration::from_secs(8));

        let expired = queue.sweep(start + Duration::from_secs(11), Duration::from_secs(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id.as_str(), "old");
        assert_eq!(queue.awaiting_len(), 1);
    }
}
