//! Topic fan-out for pointer and list events.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each subscriber gets an independent receiver that buffers up to
//! `capacity` events; a subscriber that falls further behind skips the
//! oldest events (at-most-once delivery).
//!
//! Two topic families:
//! - [`Topic::Pointer`] keyed by set: full [`StatePointer`] snapshots
//! - [`Topic::List`] keyed by tenant: bare [`ListChange`] notifications
//!
//! Events are published while the publisher still holds the set lock, so
//! per-set publish order equals commit order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::{RecvError, TryRecvError}};
use tokio::sync::RwLock;

use hudson_core::{MembershipId, SetId, StatePointer, TenantId};

/// Subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Pointer(SetId),
    List(TenantId),
}

/// What changed structurally. Consumers re-fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListChange {
    SetCreated,
    SetUpdated,
    SetDeleted,
    MembershipAdded(MembershipId),
    MembershipRemoved(MembershipId),
    MembershipUpdated(MembershipId),
    Reordered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiveEvent {
    Pointer(StatePointer),
    ListChanged {
        tenant_id: TenantId,
        set_id: Option<SetId>,
        change: ListChange,
    },
}

impl LiveEvent {
    pub fn list(tenant_id: TenantId, set_id: SetId, change: ListChange) -> Self {
        LiveEvent::ListChanged {
            tenant_id,
            set_id: Some(set_id),
            change,
        }
    }

    /// Topic this event is published on.
    pub fn topic(&self) -> Topic {
        match self {
            LiveEvent::Pointer(pointer) => Topic::Pointer(pointer.set_id),
            LiveEvent::ListChanged { tenant_id, .. } => Topic::List(*tenant_id),
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub events_sent: u64,
    pub events_lagged: u64,
    pub active_subscribers: usize,
}

/// Atomic broadcast stats, lock-free on the hot path.
#[derive(Default)]
struct AtomicBroadcastStats {
    events_sent: AtomicU64,
    events_lagged: AtomicU64,
}

/// Broadcast channel for one topic.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<LiveEvent>>,
    capacity: usize,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` is how many events a subscriber may fall behind before it
    /// starts skipping.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Send to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: Arc<LiveEvent>) -> usize {
        let count = self.sender.send(event).unwrap_or(0);
        self.stats.events_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            stats: self.stats.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events_sent: self.stats.events_sent.load(Ordering::Relaxed),
            events_lagged: self.stats.events_lagged.load(Ordering::Relaxed),
            active_subscribers: self.subscriber_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One subscriber's receive side.
pub struct Subscription {
    receiver: broadcast::Receiver<Arc<LiveEvent>>,
    stats: Arc<AtomicBroadcastStats>,
}

impl Subscription {
    /// Next event, skipping past any the subscriber lagged behind on.
    /// `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<Arc<LiveEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    self.stats.events_lagged.fetch_add(skipped, Ordering::Relaxed);
                    log::warn!("Subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Arc<LiveEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    self.stats.events_lagged.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Maps topics to broadcast groups.
pub struct TopicHub {
    groups: RwLock<HashMap<Topic, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl TopicHub {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for a topic.
    pub async fn get_or_create(&self, topic: Topic) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let groups = self.groups.read().await;
            if let Some(group) = groups.get(&topic) {
                return group.clone();
            }
        }

        // Slow path: write lock to create
        let mut groups = self.groups.write().await;
        // Double-check after acquiring write lock
        if let Some(group) = groups.get(&topic) {
            return group.clone();
        }

        let group = Arc::new(BroadcastGroup::new(self.default_capacity));
        groups.insert(topic, group.clone());
        group
    }

    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        self.get_or_create(topic).await.subscribe()
    }

    /// Publish on the event's topic. A topic nobody ever subscribed to has
    /// no group and the event goes nowhere.
    pub async fn publish(&self, event: LiveEvent) -> usize {
        let topic = event.topic();
        let group = self.groups.read().await.get(&topic).cloned();
        let delivered = match group {
            Some(group) => group.publish(Arc::new(event)),
            None => 0,
        };
        log::trace!("Published on {:?} to {} subscribers", topic, delivered);
        delivered
    }

    /// Remove a topic's group once its last subscriber is gone.
    pub async fn remove_if_idle(&self, topic: &Topic) -> bool {
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get(topic) {
            if group.subscriber_count() == 0 {
                groups.remove(topic);
                return true;
            }
        }
        false
    }

    pub async fn stats(&self, topic: &Topic) -> Option<BroadcastStats> {
        self.groups.read().await.get(topic).map(|group| group.stats())
    }

    pub async fn topic_count(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn active_topics(&self) -> Vec<Topic> {
        self.groups.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer_event(set_id: SetId, image: u32) -> LiveEvent {
        LiveEvent::Pointer(StatePointer::empty(set_id).with_image_index(image))
    }

    #[tokio::test]
    async fn test_fan_out() {
        let hub = TopicHub::new(16);
        let set_id = SetId::new();

        let mut rx1 = hub.subscribe(Topic::Pointer(set_id)).await;
        let mut rx2 = hub.subscribe(Topic::Pointer(set_id)).await;
        let mut rx3 = hub.subscribe(Topic::Pointer(set_id)).await;

        assert_eq!(hub.publish(pointer_event(set_id, 1)).await, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let event = rx.recv().await.unwrap();
            assert_eq!(*event, pointer_event(set_id, 1));
        }
    }

    #[tokio::test]
    async fn test_publish_without_group_goes_nowhere() {
        let hub = TopicHub::new(16);
        assert_eq!(hub.publish(pointer_event(SetId::new(), 0)).await, 0);
        assert_eq!(hub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = TopicHub::new(16);
        let (a, b) = (SetId::new(), SetId::new());
        let mut rx_a = hub.subscribe(Topic::Pointer(a)).await;
        let _rx_b = hub.subscribe(Topic::Pointer(b)).await;

        hub.publish(pointer_event(b, 9)).await;
        hub.publish(pointer_event(a, 1)).await;

        let event = rx_a.recv().await.unwrap();
        assert_eq!(*event, pointer_event(a, 1));
        assert_eq!(hub.topic_count().await, 2);
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let hub = TopicHub::new(16);
        let set_id = SetId::new();
        let mut rx = hub.subscribe(Topic::Pointer(set_id)).await;

        for image in 0..5 {
            hub.publish(pointer_event(set_id, image)).await;
        }
        for image in 0..5 {
            assert_eq!(*rx.recv().await.unwrap(), pointer_event(set_id, image));
        }
    }

    #[tokio::test]
    async fn test_list_event_topic() {
        let hub = TopicHub::new(16);
        let tenant = TenantId::new();
        let set_id = SetId::new();
        let mut rx = hub.subscribe(Topic::List(tenant)).await;

        hub.publish(LiveEvent::list(tenant, set_id, ListChange::Reordered)).await;
        match &*rx.recv().await.unwrap() {
            LiveEvent::ListChanged { set_id: got, change, .. } => {
                assert_eq!(*got, Some(set_id));
                assert_eq!(*change, ListChange::Reordered);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_oldest() {
        let group = BroadcastGroup::new(2);
        let set_id = SetId::new();
        let mut rx = group.subscribe();

        for image in 0..5 {
            group.publish(Arc::new(pointer_event(set_id, image)));
        }
        // Only the newest two survive
        assert_eq!(*rx.recv().await.unwrap(), pointer_event(set_id, 3));
        assert_eq!(*rx.recv().await.unwrap(), pointer_event(set_id, 4));

        let stats = group.stats();
        assert_eq!(stats.events_sent, 5);
        assert_eq!(stats.events_lagged, 3);
        assert_eq!(stats.active_subscribers, 1);
    }

    #[tokio::test]
    async fn test_remove_if_idle() {
        let hub = TopicHub::new(16);
        let topic = Topic::Pointer(SetId::new());

        let rx = hub.subscribe(topic).await;
        assert!(!hub.remove_if_idle(&topic).await);
        assert_eq!(hub.active_topics().await, vec![topic]);

        drop(rx);
        assert!(hub.remove_if_idle(&topic).await);
        assert_eq!(hub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_capacity() {
        let group = BroadcastGroup::new(32);
        assert_eq!(group.capacity(), 32);
    }
}
