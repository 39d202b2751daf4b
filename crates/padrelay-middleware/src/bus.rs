//! In-process topic/subscription message bus.
//!
//! [`InMemoryBus`] follows the pull-subscription model of hosted pub/sub
//! services so the pipelines behave the same against it as against a remote
//! bus:
//!
//! | Concept | Behaviour |
//! |---|---|
//! | Topic | Named fan-out point; publishing copies the message to every attached subscription. |
//! | Subscription | Independent queue attached to one topic. Messages published before it was created are not seen. |
//! | Pull | Leases every queued message at once; blocks while the queue is empty. |
//! | Ack deadline | A leased message that is not acknowledged in time is queued again under a fresh `ack_id`. |
//!
//! Delivery is at-least-once and redeliveries are appended behind newer
//! messages, so consumers must not assume publish order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use padrelay_types::{BusMessage, RelayError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::adapter::MessageBus;

/// How often a blocked pull re-checks for expired leases.
const REDELIVERY_POLL: Duration = Duration::from_millis(100);

struct Lease {
    message: BusMessage,
    deadline: Instant,
}

struct Subscription {
    topic: String,
    ack_deadline: Duration,
    queued: VecDeque<BusMessage>,
    leased: HashMap<String, Lease>,
}

impl Subscription {
    fn new(topic: &str, ack_deadline: Duration) -> Self {
        Self {
            topic: topic.to_string(),
            ack_deadline,
            queued: VecDeque::new(),
            leased: HashMap::new(),
        }
    }

    /// Move every lease past its deadline back onto the queue.
    fn requeue_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();
        for ack_id in &expired {
            if let Some(lease) = self.leased.remove(ack_id) {
                let mut message = lease.message;
                message.ack_id = new_id();
                self.queued.push_back(message);
            }
        }
        expired.len()
    }

    fn lease_all(&mut self, now: Instant) -> Vec<BusMessage> {
        let deadline = now + self.ack_deadline;
        let batch: Vec<BusMessage> = self.queued.drain(..).collect();
        for message in &batch {
            self.leased.insert(
                message.ack_id.clone(),
                Lease {
                    message: message.clone(),
                    deadline,
                },
            );
        }
        batch
    }
}

#[derive(Default)]
struct BusState {
    // topic name -> attached subscription names
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, Subscription>,
    closed: bool,
}

/// Shared in-process bus.  Wrap it in an `Arc` and hand clones to every
/// pipeline; all of them see the same topics and subscriptions.
#[derive(Default)]
pub struct InMemoryBus {
    state: Mutex<BusState>,
    notify: Notify,
}

impl InMemoryBus {
    /// Create an empty bus with no topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` if it does not exist yet.  Returns `true` when the topic
    /// was created by this call.
    pub fn create_topic(&self, name: &str) -> bool {
        let mut state = self.lock();
        if state.topics.contains_key(name) {
            return false;
        }
        state.topics.insert(name.to_string(), Vec::new());
        true
    }

    /// `true` when a subscription called `name` exists.
    pub fn has_subscription(&self, name: &str) -> bool {
        self.lock().subscriptions.contains_key(name)
    }

    /// Number of deliveries leased on `subscription` and not yet acknowledged.
    pub fn unacked(&self, subscription: &str) -> usize {
        self.lock()
            .subscriptions
            .get(subscription)
            .map_or(0, |sub| sub.leased.len())
    }

    /// Close the bus.  Blocked and future pulls and publishes fail with
    /// [`RelayError::Bus`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, RelayError> {
        let id = new_id();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(RelayError::Bus("bus is closed".to_string()));
            }
            let attached = state
                .topics
                .get(topic)
                .ok_or_else(|| RelayError::UnknownTopic(topic.to_string()))?;
            for name in attached {
                if let Some(sub) = state.subscriptions.get_mut(name) {
                    sub.queued.push_back(BusMessage {
                        id: id.clone(),
                        ack_id: new_id(),
                        data: data.clone(),
                    });
                }
            }
        }
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> Result<(), RelayError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.subscriptions.contains_key(name) {
            return Err(RelayError::Bus(format!("subscription {name} already exists")));
        }
        let attached = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| RelayError::UnknownTopic(topic.to_string()))?;
        attached.push(name.to_string());
        state
            .subscriptions
            .insert(name.to_string(), Subscription::new(topic, ack_deadline));
        debug!(subscription = name, topic, "subscription created");
        Ok(())
    }

    async fn pull(&self, subscription: &str) -> Result<Vec<BusMessage>, RelayError> {
        loop {
            // Register interest before inspecting the queue so a publish
            // between the check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guard = self.lock();
                let state = &mut *guard;
                if state.closed {
                    return Err(RelayError::Bus("bus is closed".to_string()));
                }
                let sub = state
                    .subscriptions
                    .get_mut(subscription)
                    .ok_or_else(|| RelayError::UnknownSubscription(subscription.to_string()))?;
                let now = Instant::now();
                let requeued = sub.requeue_expired(now);
                if requeued > 0 {
                    debug!(subscription, topic = %sub.topic, requeued, "ack deadline expired; redelivering");
                }
                if !sub.queued.is_empty() {
                    return Ok(sub.lease_all(now));
                }
            }

            let _ = tokio::time::timeout(REDELIVERY_POLL, notified).await;
        }
    }

    async fn ack(&self, subscription: &str, ack_id: &str) -> Result<(), RelayError> {
        let mut state = self.lock();
        let sub = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| RelayError::UnknownSubscription(subscription.to_string()))?;
        if sub.leased.remove(ack_id).is_none() {
            debug!(subscription, ack_id, "ack for expired or unknown delivery ignored");
        }
        Ok(())
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DEADLINE: Duration = Duration::from_secs(10);

    async fn bus_with_subscription(topic: &str, sub: &str) -> InMemoryBus {
        let bus = InMemoryBus::new();
        bus.create_topic(topic);
        bus.create_subscription(sub, topic, DEADLINE).await.unwrap();
        bus
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_is_an_error() {
        let bus = InMemoryBus::new();
        let result = bus.publish("missing", b"{}".to_vec()).await;
        assert!(matches!(result, Err(RelayError::UnknownTopic(_))));
    }

    #[tokio::test]
    async fn publish_without_subscriptions_is_dropped() {
        let bus = InMemoryBus::new();
        bus.create_topic("grid");
        assert!(bus.publish("grid", b"[]".to_vec()).await.is_ok());
    }

    #[test]
    fn create_topic_is_idempotent() {
        let bus = InMemoryBus::new();
        assert!(bus.create_topic("grid"));
        assert!(!bus.create_topic("grid"));
    }

    #[tokio::test]
    async fn duplicate_subscription_is_rejected() {
        let bus = bus_with_subscription("grid", "agent").await;
        let result = bus.create_subscription("agent", "grid", DEADLINE).await;
        assert!(matches!(result, Err(RelayError::Bus(_))));
    }

    #[tokio::test]
    async fn pull_leases_whole_batch() -> Result<(), Box<dyn std::error::Error>> {
        let bus = bus_with_subscription("grid", "agent").await;
        let first = bus.publish("grid", b"1".to_vec()).await?;
        let second = bus.publish("grid", b"2".to_vec()).await?;

        let batch = bus.pull("agent").await?;
        let ids: Vec<_> = batch.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(batch[0].data, b"1");
        assert_eq!(bus.unacked("agent"), 2);

        bus.ack("agent", &batch[0].ack_id).await?;
        assert_eq!(bus.unacked("agent"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn every_subscription_gets_a_copy() -> Result<(), Box<dyn std::error::Error>> {
        let bus = bus_with_subscription("grid", "a").await;
        bus.create_subscription("b", "grid", DEADLINE).await?;
        let id = bus.publish("grid", b"x".to_vec()).await?;

        let a = bus.pull("a").await?;
        let b = bus.pull("b").await?;
        assert_eq!(a[0].id, id);
        assert_eq!(b[0].id, id);
        assert_ne!(a[0].ack_id, b[0].ack_id);
        Ok(())
    }

    #[tokio::test]
    async fn pull_on_unknown_subscription_is_an_error() {
        let bus = InMemoryBus::new();
        let result = bus.pull("nobody").await;
        assert!(matches!(result, Err(RelayError::UnknownSubscription(_))));
    }

    #[tokio::test]
    async fn pull_blocks_until_publish() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(bus_with_subscription("grid", "agent").await);
        let puller = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.pull("agent").await })
        };
        tokio::task::yield_now().await;
        let id = bus.publish("grid", b"late".to_vec()).await?;

        let batch = tokio::time::timeout(Duration::from_secs(1), puller).await???;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_message_is_redelivered_after_deadline() -> Result<(), Box<dyn std::error::Error>> {
        let bus = bus_with_subscription("grid", "agent").await;
        let id = bus.publish("grid", b"g".to_vec()).await?;
        let first = bus.pull("agent").await?;

        tokio::time::advance(DEADLINE + Duration::from_millis(1)).await;
        let second = bus.pull("agent").await?;

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, id);
        assert_ne!(second[0].ack_id, first[0].ack_id);

        // The first delivery's ack id is stale now and must be ignored.
        bus.ack("agent", &first[0].ack_id).await?;
        assert_eq!(bus.unacked("agent"), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn acked_message_is_not_redelivered() -> Result<(), Box<dyn std::error::Error>> {
        let bus = bus_with_subscription("grid", "agent").await;
        bus.publish("grid", b"g".to_vec()).await?;
        let batch = bus.pull("agent").await?;
        bus.ack("agent", &batch[0].ack_id).await?;

        let result = tokio::time::timeout(DEADLINE * 2, bus.pull("agent")).await;
        assert!(result.is_err(), "acked message must not come back");
        Ok(())
    }

    #[tokio::test]
    async fn close_wakes_blocked_pull() {
        let bus = Arc::new(bus_with_subscription("grid", "agent").await);
        let puller = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.pull("agent").await })
        };
        tokio::task::yield_now().await;
        bus.close();

        let result = puller.await.expect("pull task must not panic");
        assert!(matches!(result, Err(RelayError::Bus(_))));
    }
}
