// Allow unwrap in testing utilities - test code should panic on errors
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

//! # NodeFlow Testing Utilities
//!
//! This crate provides testing utilities for NodeFlow applications:
//!
//! - **MemoryEventBus**: an in-process bus that records published events
//! - **StaticHandler / FailingHandler / SlowHandler**: canned tool
//!   handlers for dispatcher tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nodeflow_testing::{MemoryEventBus, StaticHandler};
//!
//! let bus = Arc::new(MemoryEventBus::new());
//! let handler = StaticHandler::new(serde_json::json!({"y": 2}));
//! ```

mod handlers;
mod memory_bus;

pub use handlers::{FailingHandler, SlowHandler, StaticHandler};
pub use memory_bus::MemoryEventBus;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{FailingHandler, MemoryEventBus, SlowHandler, StaticHandler};
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow::bus::{BusEvent, EventBus, StateChangeEvent, Topic};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn state_change(event_type: &str) -> BusEvent {
        BusEvent::StateChange(StateChangeEvent {
            event_type: event_type.to_string(),
            payload: serde_json::Value::Null,
            correlation_id: None,
        })
    }

    #[tokio::test]
    async fn test_publish_records_events() {
        let bus = MemoryEventBus::new();
        bus.publish(state_change("a")).await.unwrap();
        bus.publish(state_change("b")).await.unwrap();

        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published_on(Topic::StateChange).len(), 2);
        assert_eq!(bus.published_on(Topic::ToolResponse).len(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_topic_events() {
        let bus = MemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                Topic::StateChange,
                Arc::new(move |_event| {
                    let seen = Arc::clone(&seen);
                    Box::pin(async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
        }

        bus.publish(state_change("x")).await.unwrap();
        bus.publish(state_change("y")).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = MemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let id = {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                Topic::StateChange,
                Arc::new(move |_event| {
                    let seen = Arc::clone(&seen);
                    Box::pin(async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
        };

        bus.publish(state_change("x")).await.unwrap();
        assert!(bus.unsubscribe(Topic::StateChange, id));
        assert!(!bus.unsubscribe(Topic::StateChange, id));
        bus.publish(state_change("y")).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(Topic::StateChange), 0);
    }
}
