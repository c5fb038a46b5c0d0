// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Service node runtime: lifecycle state machine and invocation dispatch.
//!
//! A [`ServiceRuntime`] owns one node's service mode. `start` publishes the
//! node's introspection event, subscribes the dispatcher to the
//! `TOOL_INVOCATION` topic, installs signal handlers, runs a health
//! monitor, and parks in the service loop until shutdown is requested.
//! `stop` publishes the shutdown event, drains in-flight invocations with
//! a bounded timeout, runs shutdown callbacks, rolls back any transactions
//! still active in the effect executor, and unsubscribes.
//!
//! Dispatch guarantees: exactly one response per matched invocation,
//! carrying the originating correlation id; the id is in the
//! active-invocation set from just before handler execution until the
//! response has been published.

mod handler;

pub use handler::{BlockingToolHandler, FnToolHandler, ToolHandler, ToolInput};

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{
    BusEvent, EventBus, NodeIntrospectionEvent, NodeShutdownEvent, SharedEventBus,
    SubscriptionId, ToolInvocationEvent, ToolResponseEvent, ToolSpec, Topic,
};
use crate::config::ServiceConfig;
use crate::effect::EffectExecutor;
use crate::error::{Error, Result};
use crate::registry::ServiceRegistry;

/// Error code carried by failure responses from the dispatcher.
pub const TOOL_EXECUTION_ERROR: &str = "TOOL_EXECUTION_ERROR";

/// Static description of a node entering service mode.
pub struct ServiceNode {
    pub node_id: Uuid,
    pub node_name: String,
    pub tools: Vec<ToolSpec>,
    pub capability_inputs: Vec<String>,
    pub capability_outputs: Vec<String>,
    handler: Arc<dyn ToolHandler>,
}

impl ServiceNode {
    #[must_use]
    pub fn builder(node_name: impl Into<String>) -> ServiceNodeBuilder {
        ServiceNodeBuilder {
            node_id: Uuid::new_v4(),
            node_name: node_name.into(),
            tools: Vec::new(),
            capability_inputs: Vec::new(),
            capability_outputs: Vec::new(),
            handler: None,
        }
    }

    #[must_use]
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceNode")
            .field("node_id", &self.node_id)
            .field("node_name", &self.node_name)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServiceNode`].
pub struct ServiceNodeBuilder {
    node_id: Uuid,
    node_name: String,
    tools: Vec<ToolSpec>,
    capability_inputs: Vec<String>,
    capability_outputs: Vec<String>,
    handler: Option<Arc<dyn ToolHandler>>,
}

impl ServiceNodeBuilder {
    #[must_use]
    pub fn node_id(mut self, node_id: Uuid) -> Self {
        self.node_id = node_id;
        self
    }

    #[must_use]
    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    #[must_use]
    pub fn capability_input(mut self, name: impl Into<String>) -> Self {
        self.capability_inputs.push(name.into());
        self
    }

    #[must_use]
    pub fn capability_output(mut self, name: impl Into<String>) -> Self {
        self.capability_outputs.push(name.into());
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<ServiceNode> {
        let handler = self
            .handler
            .ok_or_else(|| Error::Validation("service node requires a tool handler".to_string()))?;
        Ok(ServiceNode {
            node_id: self.node_id,
            node_name: self.node_name,
            tools: self.tools,
            capability_inputs: self.capability_inputs,
            capability_outputs: self.capability_outputs,
            handler,
        })
    }
}

/// Overall service health in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Point-in-time health report for a service node.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthSnapshot {
    pub status: HealthStatus,
    pub uptime_seconds: f64,
    pub active_invocations: usize,
    pub total_invocations: u64,
    pub successful_invocations: u64,
    pub failed_invocations: u64,
    pub success_rate: f64,
    pub node_id: Uuid,
    pub node_name: String,
    pub shutdown_requested: bool,
}

struct RuntimeShared {
    node: ServiceNode,
    bus: Arc<dyn EventBus>,
    config: ServiceConfig,
    executor: Mutex<Option<Arc<EffectExecutor>>>,
    running: AtomicBool,
    shutdown_requested: AtomicBool,
    active: Mutex<HashSet<Uuid>>,
    drain_notify: Notify,
    shutdown_notify: Notify,
    start_time: Mutex<Option<Instant>>,
    total_invocations: AtomicU64,
    successful_invocations: AtomicU64,
    failed_invocations: AtomicU64,
    shutdown_callbacks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    subscription: Mutex<Option<SubscriptionId>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    signal_task: Mutex<Option<JoinHandle<()>>>,
}

/// Long-lived service mode for one node.
#[derive(Clone)]
pub struct ServiceRuntime {
    shared: Arc<RuntimeShared>,
}

impl ServiceRuntime {
    #[must_use]
    pub fn new(node: ServiceNode, bus: Arc<dyn EventBus>, config: ServiceConfig) -> Self {
        Self {
            shared: Arc::new(RuntimeShared {
                node,
                bus,
                config,
                executor: Mutex::new(None),
                running: AtomicBool::new(false),
                shutdown_requested: AtomicBool::new(false),
                active: Mutex::new(HashSet::new()),
                drain_notify: Notify::new(),
                shutdown_notify: Notify::new(),
                start_time: Mutex::new(None),
                total_invocations: AtomicU64::new(0),
                successful_invocations: AtomicU64::new(0),
                failed_invocations: AtomicU64::new(0),
                shutdown_callbacks: Mutex::new(Vec::new()),
                subscription: Mutex::new(None),
                health_task: Mutex::new(None),
                signal_task: Mutex::new(None),
            }),
        }
    }

    /// Construct with the event bus resolved from the container.
    pub fn from_registry(
        node: ServiceNode,
        registry: &ServiceRegistry,
        config: ServiceConfig,
    ) -> Result<Self> {
        let bus = registry
            .try_resolve::<SharedEventBus>(SharedEventBus::INTERFACE)
            .ok_or(Error::EventBusNotAvailable)?;
        Ok(Self::new(node, Arc::clone(&bus.0), config))
    }

    /// Attach an effect executor whose active transactions are rolled back
    /// on shutdown.
    #[must_use]
    pub fn with_effect_executor(self, executor: Arc<EffectExecutor>) -> Self {
        *self.shared.executor.lock() = Some(executor);
        self
    }

    /// Register a callback invoked (in order) during `stop`.
    pub fn on_shutdown(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.shared.shutdown_callbacks.lock().push(callback);
    }

    #[must_use]
    pub fn node_id(&self) -> Uuid {
        self.shared.node.node_id
    }

    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.shared.node.node_name
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Correlation ids currently in flight.
    #[must_use]
    pub fn active_invocations(&self) -> HashSet<Uuid> {
        self.shared.active.lock().clone()
    }

    /// Enter service mode. Parks until shutdown is requested.
    ///
    /// Idempotent: calling `start` on a running service warns and returns.
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.running.swap(true, Ordering::SeqCst) {
            warn!(node = %shared.node.node_name, "service already running");
            return Ok(());
        }
        shared.shutdown_requested.store(false, Ordering::SeqCst);

        shared
            .bus
            .publish(BusEvent::NodeIntrospection(NodeIntrospectionEvent {
                node_id: shared.node.node_id,
                node_name: shared.node.node_name.clone(),
                tools: shared.node.tools.clone(),
                capability_inputs: shared.node.capability_inputs.clone(),
                capability_outputs: shared.node.capability_outputs.clone(),
            }))
            .await?;

        let dispatch_shared = Arc::clone(&self.shared);
        let subscription = shared.bus.subscribe(
            Topic::ToolInvocation,
            Arc::new(move |event| {
                let shared = Arc::clone(&dispatch_shared);
                async move {
                    if let BusEvent::ToolInvocation(invocation) = event {
                        handle_tool_invocation(&shared, invocation).await;
                    }
                }
                .boxed()
            }),
        );
        *shared.subscription.lock() = Some(subscription);

        if shared.config.install_signal_handlers {
            let signal_shared = Arc::clone(&self.shared);
            *shared.signal_task.lock() = Some(tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                info!(node = %signal_shared.node.node_name, "shutdown signal received");
                request_shutdown(&signal_shared);
            }));
        }

        let health_shared = Arc::clone(&self.shared);
        let health_interval = shared.config.health_interval;
        *shared.health_task.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let snapshot = health_snapshot(&health_shared);
                debug!(
                    node = %health_shared.node.node_name,
                    active = snapshot.active_invocations,
                    total = snapshot.total_invocations,
                    success_rate = snapshot.success_rate,
                    "service health"
                );
            }
        }));

        *shared.start_time.lock() = Some(Instant::now());
        info!(
            node = %shared.node.node_name,
            node_id = %shared.node.node_id,
            tools = shared.node.tools.len(),
            "service mode started"
        );

        // Service event loop: park until shutdown is requested.
        while !shared.shutdown_requested.load(Ordering::SeqCst) {
            shared.shutdown_notify.notified().await;
        }
        Ok(())
    }

    /// Leave service mode: drain, run callbacks, roll back, unsubscribe.
    pub async fn stop(&self) -> Result<()> {
        let shared = &self.shared;
        if !shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        request_shutdown(shared);
        if let Err(err) = shared
            .bus
            .publish(BusEvent::NodeShutdown(NodeShutdownEvent {
                node_id: shared.node.node_id,
                node_name: shared.node.node_name.clone(),
                reason: Some("shutdown requested".to_string()),
            }))
            .await
        {
            warn!(error = %err, "failed to publish shutdown event");
        }

        if let Some(task) = shared.health_task.lock().take() {
            task.abort();
        }
        if let Some(task) = shared.signal_task.lock().take() {
            task.abort();
        }

        let drained = tokio::time::timeout(shared.config.drain_timeout, async {
            loop {
                if shared.active.lock().is_empty() {
                    break;
                }
                shared.drain_notify.notified().await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                node = %shared.node.node_name,
                still_active = shared.active.lock().len(),
                "drain timeout elapsed; proceeding with shutdown"
            );
        }

        {
            let callbacks = shared.shutdown_callbacks.lock();
            for callback in callbacks.iter() {
                let outcome =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback()));
                if outcome.is_err() {
                    error!(node = %shared.node.node_name, "shutdown callback panicked");
                }
            }
        }

        let executor = shared.executor.lock().clone();
        if let Some(executor) = executor {
            let rolled_back = executor.rollback_active_transactions();
            if rolled_back > 0 {
                warn!(rolled_back, "rolled back active transactions during shutdown");
            }
        }

        self.cleanup_event_handlers();
        shared.running.store(false, Ordering::SeqCst);
        info!(node = %shared.node.node_name, "service mode stopped");
        Ok(())
    }

    /// Health snapshot. `healthy` iff running and not shutting down.
    #[must_use]
    pub fn health(&self) -> ServiceHealthSnapshot {
        health_snapshot(&self.shared)
    }

    fn cleanup_event_handlers(&self) {
        if let Some(subscription) = self.shared.subscription.lock().take() {
            self.shared
                .bus
                .unsubscribe(Topic::ToolInvocation, subscription);
        }
    }
}

impl fmt::Debug for ServiceRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRuntime")
            .field("node_name", &self.shared.node.node_name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn request_shutdown(shared: &RuntimeShared) {
    shared.shutdown_requested.store(true, Ordering::SeqCst);
    shared.shutdown_notify.notify_one();
}

fn health_snapshot(shared: &RuntimeShared) -> ServiceHealthSnapshot {
    let running = shared.running.load(Ordering::SeqCst);
    let shutdown_requested = shared.shutdown_requested.load(Ordering::SeqCst);
    let total = shared.total_invocations.load(Ordering::SeqCst);
    let successful = shared.successful_invocations.load(Ordering::SeqCst);
    let failed = shared.failed_invocations.load(Ordering::SeqCst);

    ServiceHealthSnapshot {
        status: if running && !shutdown_requested {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        uptime_seconds: shared
            .start_time
            .lock()
            .map_or(0.0, |start| start.elapsed().as_secs_f64()),
        active_invocations: shared.active.lock().len(),
        total_invocations: total,
        successful_invocations: successful,
        failed_invocations: failed,
        success_rate: if total > 0 {
            successful as f64 / total as f64
        } else {
            1.0
        },
        node_id: shared.node.node_id,
        node_name: shared.node.node_name.clone(),
        shutdown_requested,
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Dispatch one invocation event against this node.
async fn handle_tool_invocation(shared: &Arc<RuntimeShared>, event: ToolInvocationEvent) {
    shared.total_invocations.fetch_add(1, Ordering::SeqCst);

    let matches_node = event.target_node_id == shared.node.node_id
        || event.target_node_name == shared.node.node_name;
    if !matches_node {
        warn!(
            node = %shared.node.node_name,
            target_id = %event.target_node_id,
            target_name = %event.target_node_name,
            correlation_id = %event.correlation_id,
            "ignoring invocation for a different node"
        );
        return;
    }

    let correlation_id = event.correlation_id;
    shared.active.lock().insert(correlation_id);
    let started = Instant::now();

    let outcome = run_invocation(shared, &event).await;
    let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let response = match outcome {
        Ok(result) => {
            shared.successful_invocations.fetch_add(1, Ordering::SeqCst);
            ToolResponseEvent::success(correlation_id, result, execution_time_ms)
        }
        Err(err) => {
            shared.failed_invocations.fetch_add(1, Ordering::SeqCst);
            ToolResponseEvent::failure(
                correlation_id,
                err.to_string(),
                TOOL_EXECUTION_ERROR,
                execution_time_ms,
            )
        }
    };

    if let Err(err) = shared.bus.publish(BusEvent::ToolResponse(response)).await {
        error!(
            correlation_id = %correlation_id,
            error = %err,
            "failed to publish tool response"
        );
    }

    shared.active.lock().remove(&correlation_id);
    shared.drain_notify.notify_one();
}

async fn run_invocation(
    shared: &Arc<RuntimeShared>,
    event: &ToolInvocationEvent,
) -> Result<Map<String, Value>> {
    let input = ToolInput::new(event.action.clone(), event.parameters.clone());
    let handler = shared.node.handler();

    let deadline = event
        .timeout_ms
        .map(Duration::from_millis)
        .or(shared.config.default_invocation_timeout);

    let execution = std::panic::AssertUnwindSafe(handler.run(input)).catch_unwind();
    let caught = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, execution)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "tool {} action {} exceeded {:?}",
                    event.tool_name, event.action, deadline
                ))
            })?,
        None => execution.await,
    };

    let value = match caught {
        Ok(result) => result?,
        Err(panic) => {
            return Err(Error::OperationFailed(format!(
                "handler panicked: {}",
                panic_message(&panic)
            )))
        }
    };

    serialize_handler_result(value)
}

/// Apply the response serialisation rules to a handler's return value.
fn serialize_handler_result(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Err(Error::OperationFailed(
            "handler returned null; the response schema requires a non-null result".to_string(),
        )),
        scalar_or_array => {
            let mut wrapped = Map::new();
            wrapped.insert("result".to_string(), scalar_or_array);
            Ok(wrapped)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
