use std::time::SystemTime;

use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::tickets::StreamScope;
use crate::dto::sse::ServerEvent;

struct Subscriber {
    sender: mpsc::Sender<ServerEvent>,
    user_id: String,
    connected_at: SystemTime,
}

/// A registered stream: the receiving half plus what is needed to unregister it.
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber identifier.
    pub client_id: Uuid,
    /// Scope the subscriber listens to.
    pub scope: StreamScope,
    /// Outbound events, in publish order.
    pub receiver: mpsc::Receiver<ServerEvent>,
}

/// Registry of live subscribers keyed by scope.
///
/// Each subscriber owns a bounded channel. Publishing never waits: a
/// subscriber whose channel is full or closed is dropped on the spot.
pub struct BroadcastHub {
    subscribers: DashMap<StreamScope, IndexMap<Uuid, Subscriber>>,
    capacity: usize,
}

impl BroadcastHub {
    /// Hub whose subscriber channels hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber and queue `initial` events ahead of anything published later.
    pub fn subscribe(
        &self,
        scope: StreamScope,
        client_id: Uuid,
        user_id: impl Into<String>,
        initial: Vec<ServerEvent>,
    ) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity + initial.len());
        for event in initial {
            // capacity covers the initial batch
            let _ = sender.try_send(event);
        }

        let user_id = user_id.into();
        debug!(%client_id, %scope, user_id = %user_id, "subscriber registered");
        self.subscribers.entry(scope.clone()).or_default().insert(
            client_id,
            Subscriber {
                sender,
                user_id,
                connected_at: SystemTime::now(),
            },
        );

        Subscription {
            client_id,
            scope,
            receiver,
        }
    }

    /// Push `event` to every subscriber of `scope`, returning how many received it.
    pub fn publish(&self, scope: &StreamScope, event: &ServerEvent) -> usize {
        let Some(mut entry) = self.subscribers.get_mut(scope) else {
            return 0;
        };

        entry.retain(|client_id, subscriber| {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        %client_id,
                        %scope,
                        user_id = %subscriber.user_id,
                        connected_for_ms = subscriber
                            .connected_at
                            .elapsed()
                            .map(|d| d.as_millis() as u64)
                            .unwrap_or_default(),
                        "subscriber too slow; dropping"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        let delivered = entry.len();
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.subscribers.remove_if(scope, |_, subs| subs.is_empty());
        }
        delivered
    }

    /// Remove one subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, scope: &StreamScope, client_id: Uuid) {
        if let Some(mut entry) = self.subscribers.get_mut(scope) {
            if entry.shift_remove(&client_id).is_some() {
                debug!(%client_id, %scope, "subscriber removed");
            }
        }
        self.subscribers.remove_if(scope, |_, subs| subs.is_empty());
    }

    /// Number of subscribers currently registered for `scope`.
    pub fn viewer_count(&self, scope: &StreamScope) -> usize {
        self.subscribers
            .get(scope)
            .map(|subs| subs.len())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u32) -> ServerEvent {
        ServerEvent {
            event: Some("score_event".into()),
            data: n.to_string(),
        }
    }

    fn scope() -> StreamScope {
        StreamScope::game("acct", "game-1")
    }

    #[tokio::test]
    async fn initial_events_precede_published_ones() {
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe(scope(), Uuid::new_v4(), "u", vec![event(0)]);
        hub.publish(&scope(), &event(1));
        hub.publish(&scope(), &event(2));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(sub.receiver.recv().await.unwrap().data);
        }
        assert_eq!(seen, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn full_subscriber_is_dropped_without_blocking_others() {
        let hub = BroadcastHub::new(1);
        let _slow = hub.subscribe(scope(), Uuid::new_v4(), "slow", Vec::new());
        let mut fast = hub.subscribe(scope(), Uuid::new_v4(), "fast", Vec::new());

        assert_eq!(hub.publish(&scope(), &event(1)), 2);
        fast.receiver.recv().await.unwrap();
        assert_eq!(hub.publish(&scope(), &event(2)), 1);
        assert_eq!(hub.viewer_count(&scope()), 1);
        assert_eq!(fast.receiver.recv().await.unwrap().data, "2");
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned_on_publish() {
        let hub = BroadcastHub::new(4);
        let sub = hub.subscribe(scope(), Uuid::new_v4(), "u", Vec::new());
        drop(sub);
        assert_eq!(hub.publish(&scope(), &event(1)), 0);
        assert_eq!(hub.viewer_count(&scope()), 0);
    }

    #[test]
    fn unsubscribe_removes_only_that_client() {
        let hub = BroadcastHub::new(4);
        let a = hub.subscribe(scope(), Uuid::new_v4(), "a", Vec::new());
        let _b = hub.subscribe(scope(), Uuid::new_v4(), "b", Vec::new());
        hub.unsubscribe(&scope(), a.client_id);
        assert_eq!(hub.viewer_count(&scope()), 1);
        hub.unsubscribe(&scope(), Uuid::new_v4());
        assert_eq!(hub.viewer_count(&scope()), 1);
    }
}
