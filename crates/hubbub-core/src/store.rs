use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{HubError, HubResult};
use crate::types::{SubscriberEvent, Subscription};

/// Storage contract for verified subscriptions.
///
/// Durable backends may substitute for [`InMemorySubscriptionStore`] as long
/// as they keep the same semantics: at most one subscription per
/// (topic, callback), and unknown topics read as empty.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All subscriptions registered for `topic` (empty when unknown).
    async fn get_subscriptions(&self, topic: &str) -> HubResult<Vec<Subscription>>;

    /// Register a subscription. A second call for the same callback is a no-op.
    async fn subscribe(&self, subscription: &Subscription) -> HubResult<()>;

    /// Remove every entry with the subscription's callback from its topic.
    async fn unsubscribe(&self, subscription: &Subscription) -> HubResult<()>;

    /// Record a domain event (event-sourced backends).
    async fn create_event(&self, event: &SubscriberEvent) -> HubResult<()>;
}

type TopicSlot = Arc<ArcSwap<Vec<Subscription>>>;

/// In-memory subscription registry.
///
/// Each topic owns an immutable snapshot behind an `ArcSwap`. Writers build a
/// new snapshot and install it with a compare-and-swap (`rcu`), retrying when
/// another writer got there first, so concurrent subscribes never lose an entry
/// and readers never block.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    topics: DashMap<String, TopicSlot>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, topic: &str) -> TopicSlot {
        if let Some(slot) = self.topics.get(topic) {
            return slot.value().clone();
        }
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(Vec::new())))
            .value()
            .clone()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get_subscriptions(&self, topic: &str) -> HubResult<Vec<Subscription>> {
        Ok(self
            .topics
            .get(topic)
            .map(|slot| Vec::clone(&slot.load()))
            .unwrap_or_default())
    }

    async fn subscribe(&self, subscription: &Subscription) -> HubResult<()> {
        if subscription.topic.is_empty() {
            return Err(HubError::validation("topic is required"));
        }

        let slot = self.slot(&subscription.topic);
        let mut added = false;
        slot.rcu(|current| {
            if current.iter().any(|s| s.same_target(subscription)) {
                added = false;
                Arc::clone(current)
            } else {
                added = true;
                let mut next = Vec::clone(current);
                next.push(subscription.clone());
                Arc::new(next)
            }
        });

        debug!(
            topic = %subscription.topic,
            callback = %subscription.callback,
            added,
            "Subscription stored"
        );
        Ok(())
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> HubResult<()> {
        let Some(slot) = self.topics.get(&subscription.topic).map(|s| s.value().clone()) else {
            return Ok(());
        };

        slot.rcu(|current| {
            let next: Vec<Subscription> = current
                .iter()
                .filter(|s| !s.same_target(subscription))
                .cloned()
                .collect();
            Arc::new(next)
        });

        debug!(
            topic = %subscription.topic,
            callback = %subscription.callback,
            "Subscription removed"
        );
        Ok(())
    }

    async fn create_event(&self, _event: &SubscriberEvent) -> HubResult<()> {
        Err(HubError::NotSupported(
            "in-memory store does not record subscriber events".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;
    use url::Url;

    fn sub(topic: &str, callback: &str) -> Subscription {
        Subscription::new(topic, Url::parse(callback).unwrap(), None).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_topic_is_empty() {
        let store = InMemorySubscriptionStore::new();
        assert!(store.get_subscriptions("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let store = InMemorySubscriptionStore::new();
        let s = sub("topic", "http://a.example/cb");

        store.subscribe(&s).await.unwrap();
        store.subscribe(&s).await.unwrap();

        let subs = store.get_subscriptions("topic").await.unwrap();
        assert_eq!(subs, vec![s]);
    }

    #[tokio::test]
    async fn test_callback_identity_ignores_secret() {
        let store = InMemorySubscriptionStore::new();
        let callback = Url::parse("http://a.example/cb").unwrap();
        let first = Subscription::new("topic", callback.clone(), Some("one".into())).unwrap();
        let second = Subscription::new("topic", callback.clone(), Some("two".into())).unwrap();

        store.subscribe(&first).await.unwrap();
        store.subscribe(&second).await.unwrap();
        assert_eq!(store.get_subscriptions("topic").await.unwrap(), vec![first]);

        let plain = Subscription::new("topic", callback, None).unwrap();
        store.unsubscribe(&plain).await.unwrap();
        assert!(store.get_subscriptions("topic").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let store = InMemorySubscriptionStore::new();
        store.subscribe(&sub("a", "http://x.example/")).await.unwrap();
        store.subscribe(&sub("b", "http://x.example/")).await.unwrap();
        store.subscribe(&sub("b", "http://y.example/")).await.unwrap();

        assert_eq!(store.get_subscriptions("a").await.unwrap().len(), 1);
        assert_eq!(store.get_subscriptions("b").await.unwrap().len(), 2);
        assert!(store.get_subscriptions("A").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let store = InMemorySubscriptionStore::new();
        let a = sub("topic", "http://a.example/");
        let b = sub("topic", "http://b.example/");
        store.subscribe(&a).await.unwrap();
        store.subscribe(&b).await.unwrap();

        store.unsubscribe(&a).await.unwrap();
        assert_eq!(store.get_subscriptions("topic").await.unwrap(), vec![b.clone()]);

        // unknown callback and unknown topic are no-ops
        store.unsubscribe(&a).await.unwrap();
        store.unsubscribe(&sub("other", "http://a.example/")).await.unwrap();
        assert_eq!(store.get_subscriptions("topic").await.unwrap(), vec![b]);
    }

    #[test]
    fn test_create_event_not_supported() {
        let store = InMemorySubscriptionStore::new();
        let event = SubscriberEvent::new("topic", "created").unwrap();
        assert!(matches!(
            block_on(store.create_event(&event)),
            Err(HubError::NotSupported(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribes_keep_every_callback() {
        let store = Arc::new(InMemorySubscriptionStore::new());

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let s = sub("shared", &format!("http://sub{i}.example/cb"));
                store.subscribe(&s).await.unwrap();
                // duplicate from a racing writer
                store.subscribe(&s).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_subscriptions("shared").await.unwrap().len(), 64);
    }
}
