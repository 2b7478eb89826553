//! Broadcast of control-plane events to connected subscribers

use intercept_common::ServerMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

pub type SubscriberId = u64;

/// Each subscriber gets a bounded queue. A subscriber that falls behind or
/// goes away is dropped from the list; the others keep receiving.
pub struct Fanout {
    subscribers: Mutex<Vec<(SubscriberId, mpsc::Sender<ServerMessage>)>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Fanout {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber. `initial` is queued under the subscriber lock,
    /// so no broadcast can reach the new subscriber ahead of it.
    pub async fn subscribe<F>(&self, initial: F) -> (SubscriberId, mpsc::Receiver<ServerMessage>)
    where
        F: FnOnce() -> Vec<ServerMessage>,
    {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock().await;
        for message in initial() {
            if tx.try_send(message).is_err() {
                break;
            }
        }
        subscribers.push((id, tx));
        debug!(subscriber = id, total = subscribers.len(), "Subscriber connected");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|(sid, _)| *sid != id);
        debug!(subscriber = id, total = subscribers.len(), "Subscriber disconnected");
    }

    /// Deliver to every subscriber. Returns how many accepted the message.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = 0;
        subscribers.retain(|(id, tx)| match tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = *id, "Subscriber queue full, disconnecting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Deliver to one subscriber only.
    pub async fn send_to(&self, id: SubscriberId, message: ServerMessage) -> bool {
        let subscribers = self.subscribers.lock().await;
        subscribers
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, tx)| tx.try_send(message).is_ok())
            .unwrap_or(false)
    }

    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_status_comes_first() {
        let fanout = Fanout::new(8);
        let (_, mut rx) = fanout
            .subscribe(|| vec![ServerMessage::InterceptStatus { enabled: true }])
            .await;
        fanout
            .broadcast(ServerMessage::Error {
                message: "later".into(),
            })
            .await;

        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::InterceptStatus { enabled: true })
        );
        assert!(matches!(rx.recv().await, Some(ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped_others_continue() {
        let fanout = Fanout::new(1);
        let (_, _slow) = fanout.subscribe(Vec::new).await;
        let (_, mut fast) = fanout.subscribe(Vec::new).await;

        let first = ServerMessage::InterceptStatus { enabled: true };
        assert_eq!(fanout.broadcast(first.clone()).await, 2);
        assert_eq!(fast.recv().await, Some(first));

        let second = ServerMessage::InterceptStatus { enabled: false };
        assert_eq!(fanout.broadcast(second.clone()).await, 1);
        assert_eq!(fast.recv().await, Some(second));
        assert_eq!(fanout.len().await, 1);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let fanout = Fanout::new(4);
        let (_, rx) = fanout.subscribe(Vec::new).await;
        drop(rx);
        assert_eq!(
            fanout
                .broadcast(ServerMessage::InterceptStatus { enabled: false })
                .await,
            0
        );
        assert_eq!(fanout.len().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_targets_one_subscriber() {
        let fanout = Fanout::new(4);
        let (a, mut rx_a) = fanout.subscribe(Vec::new).await;
        let (_, mut rx_b) = fanout.subscribe(Vec::new).await;

        assert!(
            fanout
                .send_to(a, ServerMessage::Removed { id: "x".into() })
                .await
        );
        assert!(matches!(rx_a.recv().await, Some(ServerMessage::Removed { .. })));
        assert!(rx_b.try_recv().is_err());

        fanout.unsubscribe(a).await;
        assert!(
            !fanout
                .send_to(a, ServerMessage::Removed { id: "x".into() })
                .await
        );
    }
}
