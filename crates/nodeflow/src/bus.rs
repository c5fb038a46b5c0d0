// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Event bus abstraction and the wire-shaped events the runtime publishes.
//!
//! The runtime never talks to a transport directly; it depends on the
//! [`EventBus`] trait. Subscription bookkeeping is synchronous, publishing
//! is asynchronous, and an acknowledged publish must never lose the event.
//! Transports (in-process, Kafka, ...) live outside this crate; the test
//! bus ships in `nodeflow-testing`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;

/// Topics used by the core runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    ToolInvocation,
    ToolResponse,
    NodeIntrospection,
    NodeShutdown,
    /// Free-form state-change events emitted by effect nodes.
    StateChange,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::ToolInvocation => "TOOL_INVOCATION",
            Topic::ToolResponse => "TOOL_RESPONSE",
            Topic::NodeIntrospection => "NODE_INTROSPECTION",
            Topic::NodeShutdown => "NODE_SHUTDOWN",
            Topic::StateChange => "STATE_CHANGE",
        };
        f.write_str(name)
    }
}

/// A declared tool on a node: name, supported actions, description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSpec {
    pub tool_name: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl ToolSpec {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            actions: Vec::new(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Request to invoke a tool on a target node. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationEvent {
    /// Propagated verbatim into the response.
    pub correlation_id: Uuid,
    pub target_node_id: Uuid,
    pub target_node_name: String,
    pub tool_name: String,
    pub action: String,
    pub requester_id: Uuid,
    pub requester_node_id: Uuid,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl ToolInvocationEvent {
    /// Create an invocation with a fresh correlation id.
    pub fn new(
        target_node_id: Uuid,
        target_node_name: impl Into<String>,
        tool_name: impl Into<String>,
        action: impl Into<String>,
        requester_id: Uuid,
        requester_node_id: Uuid,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            target_node_id,
            target_node_name: target_node_name.into(),
            tool_name: tool_name.into(),
            action: action.into(),
            requester_id,
            requester_node_id,
            parameters: Map::new(),
            timeout_ms: None,
            priority: None,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Result of a handled invocation. Emitted exactly once per match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponseEvent {
    /// Same correlation id as the originating invocation.
    pub correlation_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub execution_time_ms: f64,
}

impl ToolResponseEvent {
    pub fn success(correlation_id: Uuid, result: Map<String, Value>, execution_time_ms: f64) -> Self {
        Self {
            correlation_id,
            success: true,
            result: Some(result),
            error: None,
            error_code: None,
            execution_time_ms,
        }
    }

    pub fn failure(
        correlation_id: Uuid,
        error: impl Into<String>,
        error_code: impl Into<String>,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            correlation_id,
            success: false,
            result: None,
            error: Some(error.into()),
            error_code: Some(error_code.into()),
            execution_time_ms,
        }
    }
}

/// Self-description a node publishes when entering service mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIntrospectionEvent {
    pub node_id: Uuid,
    pub node_name: String,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub capability_inputs: Vec<String>,
    #[serde(default)]
    pub capability_outputs: Vec<String>,
}

/// Published when a node begins shutting down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeShutdownEvent {
    pub node_id: Uuid,
    pub node_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Free-form state-change event (used by the event-emission effect handler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub event_type: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

/// Any event the core runtime can publish or receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    ToolInvocation(ToolInvocationEvent),
    ToolResponse(ToolResponseEvent),
    NodeIntrospection(NodeIntrospectionEvent),
    NodeShutdown(NodeShutdownEvent),
    StateChange(StateChangeEvent),
}

impl BusEvent {
    /// Topic this event is routed on.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::ToolInvocation(_) => Topic::ToolInvocation,
            BusEvent::ToolResponse(_) => Topic::ToolResponse,
            BusEvent::NodeIntrospection(_) => Topic::NodeIntrospection,
            BusEvent::NodeShutdown(_) => Topic::NodeShutdown,
            BusEvent::StateChange(_) => Topic::StateChange,
        }
    }

    /// Correlation id carried by the event, when it has one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            BusEvent::ToolInvocation(e) => Some(e.correlation_id),
            BusEvent::ToolResponse(e) => Some(e.correlation_id),
            BusEvent::StateChange(e) => e.correlation_id,
            _ => None,
        }
    }
}

/// Identifies one subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber callback. Handlers receive every event on their topic.
pub type EventHandler = Arc<dyn Fn(BusEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Transport seam for the runtime.
///
/// `subscribe`/`unsubscribe` are synchronous bookkeeping; `publish` is
/// asynchronous and must not lose an event after returning `Ok`.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register `handler` for all events on `topic`.
    fn subscribe(&self, topic: Topic, handler: EventHandler) -> SubscriptionId;

    /// Remove a previous subscription. Returns false if it was unknown.
    fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool;

    /// Publish an event on its topic.
    async fn publish(&self, event: BusEvent) -> Result<()>;
}

/// Newtype making a shared bus registrable in the service registry.
///
/// The registry stores concrete types; trait objects go in behind a
/// nominal wrapper that callers downcast back at the boundary.
#[derive(Clone)]
pub struct SharedEventBus(pub Arc<dyn EventBus>);

impl SharedEventBus {
    /// Interface name the runtime resolves this wrapper under.
    pub const INTERFACE: &'static str = "EventBus";
}

impl fmt::Debug for SharedEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_display() {
        assert_eq!(Topic::ToolInvocation.to_string(), "TOOL_INVOCATION");
        assert_eq!(Topic::NodeShutdown.to_string(), "NODE_SHUTDOWN");
    }

    #[test]
    fn test_invocation_round_trip() {
        let event = ToolInvocationEvent::new(
            Uuid::new_v4(),
            "indexer",
            "index",
            "rebuild",
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
        .with_parameter("shard", Value::from(3))
        .with_timeout_ms(5_000);

        let json = serde_json::to_string(&BusEvent::ToolInvocation(event.clone())).unwrap();
        let parsed: BusEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.topic(), Topic::ToolInvocation);
        assert_eq!(parsed.correlation_id(), Some(event.correlation_id));
        match parsed {
            BusEvent::ToolInvocation(e) => {
                assert_eq!(e.tool_name, "index");
                assert_eq!(e.parameters["shard"], Value::from(3));
                assert_eq!(e.timeout_ms, Some(5_000));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_response_constructors() {
        let correlation = Uuid::new_v4();
        let ok = ToolResponseEvent::success(correlation, Map::new(), 1.5);
        assert!(ok.success);
        assert_eq!(ok.correlation_id, correlation);
        assert!(ok.error.is_none());

        let err = ToolResponseEvent::failure(correlation, "boom", "TOOL_EXECUTION_ERROR", 0.3);
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("boom"));
        assert_eq!(err.error_code.as_deref(), Some("TOOL_EXECUTION_ERROR"));
    }
}
