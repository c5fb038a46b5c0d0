//! In-memory event bus for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use nodeflow::bus::{
    BusEvent, EventBus, EventHandler, SubscriptionId, ToolResponseEvent, Topic,
};
use nodeflow::Result;
use parking_lot::Mutex;

/// Event bus that delivers events inline to current subscribers and
/// records everything published for later assertions.
#[derive(Default)]
pub struct MemoryEventBus {
    subscribers: Mutex<HashMap<Topic, Vec<(SubscriptionId, EventHandler)>>>,
    published: Mutex<Vec<BusEvent>>,
}

impl MemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<BusEvent> {
        self.published.lock().clone()
    }

    /// Published events on one topic, in order.
    #[must_use]
    pub fn published_on(&self, topic: Topic) -> Vec<BusEvent> {
        self.published
            .lock()
            .iter()
            .filter(|event| event.topic() == topic)
            .cloned()
            .collect()
    }

    /// Tool responses published so far, in order.
    #[must_use]
    pub fn responses(&self) -> Vec<ToolResponseEvent> {
        self.published
            .lock()
            .iter()
            .filter_map(|event| match event {
                BusEvent::ToolResponse(response) => Some(response.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of active subscriptions on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Forget all recorded events (subscriptions stay).
    pub fn clear_published(&self) {
        self.published.lock().clear();
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    fn subscribe(&self, topic: Topic, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscribers
            .lock()
            .entry(topic)
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(entries) = subscribers.get_mut(&topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    async fn publish(&self, event: BusEvent) -> Result<()> {
        self.published.lock().push(event.clone());
        let handlers: Vec<EventHandler> = self
            .subscribers
            .lock()
            .get(&event.topic())
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(event.clone()).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("published", &self.published.lock().len())
            .finish_non_exhaustive()
    }
}
