// Notification fan-out registry

use crate::network::Notification;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Per-method fan-out of server notifications.
///
/// Each method owns one bounded broadcast channel. Every subscriber gets an
/// independent cursor into it, so a slow subscriber never blocks delivery to
/// the others. When a subscriber falls more than `capacity` messages behind,
/// the oldest messages are dropped for that subscriber only.
pub struct SubscriptionRegistry {
    channels: Mutex<HashMap<String, broadcast::Sender<Notification>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new independent subscriber for `method`
    pub fn subscribe(&self, method: &str) -> Subscription {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let receiver = channels
            .entry(method.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        Subscription {
            method: method.to_string(),
            receiver,
            lost: 0,
        }
    }

    /// Deliver a notification to every subscriber of its method.
    /// Returns the number of subscribers reached; with none the message is dropped.
    pub fn dispatch(&self, notification: Notification) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = channels.get(&notification.method) else {
            log::trace!("No subscriber for {}, dropping notification", notification.method);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return 0;
        };

        let method = notification.method.clone();
        match sender.send(notification) {
            Ok(receivers) => receivers,
            Err(_) => {
                log::trace!("All subscribers of {} are gone, dropping notification", method);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Number of live subscribers for `method`
    pub fn subscriber_count(&self, method: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(method).map(|s| s.receiver_count()).unwrap_or(0)
    }

    /// Notifications that reached nobody
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drop every channel; subscribers see the end of their stream once drained.
    pub fn close(&self) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.clear();
    }
}

/// One subscriber's view of a notification method
pub struct Subscription {
    method: String,
    receiver: broadcast::Receiver<Notification>,
    lost: u64,
}

impl Subscription {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Next notification in arrival order, or None once the connection is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(RecvError::Lagged(skipped)) => {
                    self.lost += skipped;
                    log::warn!(
                        "Subscriber to {} fell behind, {} oldest notifications dropped",
                        self.method,
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Notifications this subscriber missed because it was too slow
    pub fn lost(&self) -> u64 {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(method: &str, n: u64) -> Notification {
        Notification {
            method: method.to_string(),
            params: json!([n]),
        }
    }

    #[tokio::test]
    async fn test_fan_out_same_order() {
        let registry = SubscriptionRegistry::new(16);
        let mut a = registry.subscribe("blockchain.headers.subscribe");
        let mut b = registry.subscribe("blockchain.headers.subscribe");

        for n in 0..5 {
            assert_eq!(registry.dispatch(note("blockchain.headers.subscribe", n)), 2);
        }

        for n in 0..5 {
            assert_eq!(a.recv().await.unwrap().params, json!([n]));
        }
        for n in 0..5 {
            assert_eq!(b.recv().await.unwrap().params, json!([n]));
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_only_for_itself() {
        let registry = SubscriptionRegistry::new(4);
        let mut fast = registry.subscribe("m");
        let mut slow = registry.subscribe("m");

        for n in 0..10 {
            registry.dispatch(note("m", n));
            assert_eq!(fast.recv().await.unwrap().params, json!([n]));
        }

        // slow only sees the newest `capacity` messages
        let first = slow.recv().await.unwrap();
        assert_eq!(first.params, json!([6]));
        assert_eq!(slow.lost(), 6);
        for n in 7..10 {
            assert_eq!(slow.recv().await.unwrap().params, json!([n]));
        }
        assert_eq!(fast.lost(), 0);
    }

    #[test]
    fn test_no_subscriber_drops() {
        let registry = SubscriptionRegistry::new(4);
        assert_eq!(registry.dispatch(note("unknown", 1)), 0);
        assert_eq!(registry.dropped(), 1);
    }

    #[tokio::test]
    async fn test_methods_are_isolated() {
        let registry = SubscriptionRegistry::new(4);
        let mut headers = registry.subscribe("blockchain.headers.subscribe");
        let _scripts = registry.subscribe("blockchain.scripthash.subscribe");

        registry.dispatch(note("blockchain.scripthash.subscribe", 1));
        registry.dispatch(note("blockchain.headers.subscribe", 2));

        assert_eq!(headers.recv().await.unwrap().params, json!([2]));
        assert_eq!(registry.subscriber_count("blockchain.scripthash.subscribe"), 1);
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let registry = SubscriptionRegistry::new(4);
        let mut sub = registry.subscribe("m");
        registry.dispatch(note("m", 1));
        registry.close();

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
