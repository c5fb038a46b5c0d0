// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Structured execution trace built incrementally during a node execution.
//!
//! A [`ManifestGenerator`] collects capability activations, hook traces,
//! ordering decisions, emissions, and failures, then produces an
//! [`ExecutionManifest`]. `build` may be called repeatedly: the manifest id
//! is stable and counts reflect the state at call time. Hooks still
//! pending at build time are completed as `cancelled` and reported at the
//! end of the trace list.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Terminal (or in-flight) state of one hook execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One hook execution inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookTrace {
    pub hook_id: String,
    pub handler_id: String,
    pub phase: String,
    pub status: HookStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Whether a declared capability activated, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityActivation {
    pub name: String,
    pub activated: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate_result: Option<bool>,
}

/// Phase ordering decision recorded by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderingSummary {
    pub phases: Vec<String>,
    pub resolved_order: Vec<String>,
    pub policy: String,
}

/// One dependency edge considered during ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub edge_type: String,
    pub satisfied: bool,
}

/// A failure recorded during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFailure {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_id: Option<String>,
    pub recoverable: bool,
}

/// Emission counters and deduplicated type sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmissionsSummary {
    pub event_count: u64,
    pub intent_count: u64,
    pub projection_count: u64,
    pub action_count: u64,
    pub event_types: Vec<String>,
    pub intent_types: Vec<String>,
    pub projection_types: Vec<String>,
    pub action_types: Vec<String>,
}

/// Derived metrics computed at build time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_duration_ms: f64,
    pub hook_count: usize,
    pub completed_hooks: usize,
    pub failed_hooks: usize,
    pub cancelled_hooks: usize,
    /// Per handler, the sum of all its hook durations across phases.
    pub handler_durations_ms: HashMap<String, f64>,
}

/// The finalized execution trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionManifest {
    pub node_id: Uuid,
    pub node_name: String,
    pub contract_id: String,
    pub manifest_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_manifest_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub built_at: DateTime<Utc>,
    pub capability_activations: Vec<CapabilityActivation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering: Option<OrderingSummary>,
    pub dependency_edges: Vec<DependencyEdge>,
    pub hook_traces: Vec<HookTrace>,
    pub emissions: EmissionsSummary,
    pub failures: Vec<ManifestFailure>,
    pub metrics: MetricsSummary,
}

/// Callback invoked after each `build`.
pub type ManifestCallback = Box<dyn Fn(&ExecutionManifest) + Send + Sync>;

struct HookRecord {
    trace: HookTrace,
    started: Instant,
    open: bool,
}

#[derive(Default)]
struct Buffers {
    capability_activations: Vec<CapabilityActivation>,
    ordering: Option<OrderingSummary>,
    dependency_edges: Vec<DependencyEdge>,
    hooks: Vec<HookRecord>,
    failures: Vec<ManifestFailure>,
    event_count: u64,
    intent_count: u64,
    projection_count: u64,
    action_count: u64,
    event_types: BTreeSet<String>,
    intent_types: BTreeSet<String>,
    projection_types: BTreeSet<String>,
    action_types: BTreeSet<String>,
}

/// Incremental trace builder for one node execution.
pub struct ManifestGenerator {
    node_id: Uuid,
    node_name: String,
    contract_id: String,
    manifest_id: Uuid,
    parent_manifest_id: Option<Uuid>,
    correlation_id: Option<Uuid>,
    started_at: DateTime<Utc>,
    started: Instant,
    buffers: Mutex<Buffers>,
    callbacks: Mutex<Vec<ManifestCallback>>,
}

impl ManifestGenerator {
    #[must_use]
    pub fn new(
        node_id: Uuid,
        node_name: impl Into<String>,
        contract_id: impl Into<String>,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            node_id,
            node_name: node_name.into(),
            contract_id: contract_id.into(),
            manifest_id: Uuid::new_v4(),
            parent_manifest_id: None,
            correlation_id,
            started_at: Utc::now(),
            started: Instant::now(),
            buffers: Mutex::new(Buffers::default()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_parent_manifest_id(mut self, parent: Uuid) -> Self {
        self.parent_manifest_id = Some(parent);
        self
    }

    #[must_use]
    pub fn manifest_id(&self) -> Uuid {
        self.manifest_id
    }

    /// Register a callback invoked after each `build`, in registration
    /// order. A panicking callback is logged and does not stop the rest.
    pub fn on_manifest_built(&self, callback: ManifestCallback) {
        self.callbacks.lock().push(callback);
    }

    pub fn record_capability_activation(
        &self,
        name: impl Into<String>,
        activated: bool,
        reason: impl Into<String>,
        predicate_expression: Option<String>,
        predicate_result: Option<bool>,
    ) {
        self.buffers.lock().capability_activations.push(CapabilityActivation {
            name: name.into(),
            activated,
            reason: reason.into(),
            predicate_expression,
            predicate_result,
        });
    }

    pub fn record_ordering(
        &self,
        phases: Vec<String>,
        resolved_order: Vec<String>,
        policy: impl Into<String>,
    ) {
        self.buffers.lock().ordering = Some(OrderingSummary {
            phases,
            resolved_order,
            policy: policy.into(),
        });
    }

    pub fn add_dependency_edge(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        edge_type: impl Into<String>,
        satisfied: bool,
    ) {
        self.buffers.lock().dependency_edges.push(DependencyEdge {
            from: from.into(),
            to: to.into(),
            edge_type: edge_type.into(),
            satisfied,
        });
    }

    /// Begin tracing a hook execution.
    pub fn start_hook(
        &self,
        hook_id: impl Into<String>,
        handler_id: impl Into<String>,
        phase: impl Into<String>,
    ) {
        self.buffers.lock().hooks.push(HookRecord {
            trace: HookTrace {
                hook_id: hook_id.into(),
                handler_id: handler_id.into(),
                phase: phase.into(),
                status: HookStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: 0.0,
                error_message: None,
                error_code: None,
            },
            started: Instant::now(),
            open: true,
        });
    }

    /// Complete a previously started hook.
    ///
    /// Completing an unknown hook id logs a warning and inserts a
    /// synthetic trace with handler id `unknown`.
    pub fn complete_hook(
        &self,
        hook_id: &str,
        status: HookStatus,
        error_message: Option<String>,
        error_code: Option<String>,
    ) {
        let mut buffers = self.buffers.lock();
        let record = buffers
            .hooks
            .iter_mut()
            .find(|record| record.open && record.trace.hook_id == hook_id);

        match record {
            Some(record) => {
                record.open = false;
                record.trace.status = status;
                record.trace.completed_at = Some(Utc::now());
                record.trace.duration_ms = record.started.elapsed().as_secs_f64() * 1000.0;
                record.trace.error_message = error_message;
                record.trace.error_code = error_code;
            }
            None => {
                warn!(hook_id, "completing unknown hook; inserting synthetic trace");
                let now = Utc::now();
                buffers.hooks.push(HookRecord {
                    trace: HookTrace {
                        hook_id: hook_id.to_string(),
                        handler_id: "unknown".to_string(),
                        phase: "unknown".to_string(),
                        status,
                        started_at: now,
                        completed_at: Some(now),
                        duration_ms: 0.0,
                        error_message,
                        error_code,
                    },
                    started: Instant::now(),
                    open: false,
                });
            }
        }
    }

    pub fn record_event(&self, event_type: impl Into<String>) {
        let mut buffers = self.buffers.lock();
        buffers.event_count += 1;
        buffers.event_types.insert(event_type.into());
    }

    pub fn record_intent(&self, intent_type: impl Into<String>) {
        let mut buffers = self.buffers.lock();
        buffers.intent_count += 1;
        buffers.intent_types.insert(intent_type.into());
    }

    pub fn record_projection(&self, projection_type: impl Into<String>) {
        let mut buffers = self.buffers.lock();
        buffers.projection_count += 1;
        buffers.projection_types.insert(projection_type.into());
    }

    pub fn record_action(&self, action_type: impl Into<String>) {
        let mut buffers = self.buffers.lock();
        buffers.action_count += 1;
        buffers.action_types.insert(action_type.into());
    }

    pub fn record_failure(
        &self,
        code: impl Into<String>,
        message: impl Into<String>,
        phase: Option<String>,
        handler_id: Option<String>,
        recoverable: bool,
    ) {
        self.buffers.lock().failures.push(ManifestFailure {
            code: code.into(),
            message: message.into(),
            phase,
            handler_id,
            recoverable,
        });
    }

    /// Finalize the trace and invoke build callbacks.
    ///
    /// Idempotent: the manifest id is stable and counts reflect the state
    /// at call time. Hooks still pending are marked `cancelled`.
    pub fn build(&self) -> ExecutionManifest {
        let manifest = self.snapshot(true);

        let callbacks = self.callbacks.lock();
        for callback in callbacks.iter() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&manifest)
            }));
            if outcome.is_err() {
                warn!(manifest_id = %self.manifest_id, "manifest build callback panicked");
            }
        }
        manifest
    }

    /// Monotone estimate of the serialized manifest size.
    #[must_use]
    pub fn estimate_json_size_bytes(&self) -> usize {
        let manifest = self.snapshot(false);
        serde_json::to_vec(&manifest).map(|v| v.len()).unwrap_or(0)
    }

    fn snapshot(&self, cancel_pending: bool) -> ExecutionManifest {
        let mut buffers = self.buffers.lock();

        if cancel_pending {
            for record in buffers.hooks.iter_mut().filter(|r| r.open) {
                record.open = false;
                record.trace.status = HookStatus::Cancelled;
                record.trace.completed_at = Some(Utc::now());
                record.trace.duration_ms = record.started.elapsed().as_secs_f64() * 1000.0;
            }
        }

        // Traces preserve start order; cancelled hooks go to the end.
        let mut hook_traces: Vec<HookTrace> = buffers
            .hooks
            .iter()
            .filter(|r| r.trace.status != HookStatus::Cancelled)
            .map(|r| r.trace.clone())
            .collect();
        hook_traces.extend(
            buffers
                .hooks
                .iter()
                .filter(|r| r.trace.status == HookStatus::Cancelled)
                .map(|r| r.trace.clone()),
        );

        let mut handler_durations_ms: HashMap<String, f64> = HashMap::new();
        for trace in &hook_traces {
            *handler_durations_ms
                .entry(trace.handler_id.clone())
                .or_insert(0.0) += trace.duration_ms;
        }

        let metrics = MetricsSummary {
            total_duration_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            hook_count: hook_traces.len(),
            completed_hooks: hook_traces
                .iter()
                .filter(|t| t.status == HookStatus::Completed)
                .count(),
            failed_hooks: hook_traces
                .iter()
                .filter(|t| t.status == HookStatus::Failed)
                .count(),
            cancelled_hooks: hook_traces
                .iter()
                .filter(|t| t.status == HookStatus::Cancelled)
                .count(),
            handler_durations_ms,
        };

        ExecutionManifest {
            node_id: self.node_id,
            node_name: self.node_name.clone(),
            contract_id: self.contract_id.clone(),
            manifest_id: self.manifest_id,
            parent_manifest_id: self.parent_manifest_id,
            correlation_id: self.correlation_id,
            started_at: self.started_at,
            built_at: Utc::now(),
            capability_activations: buffers.capability_activations.clone(),
            ordering: buffers.ordering.clone(),
            dependency_edges: buffers.dependency_edges.clone(),
            hook_traces,
            emissions: EmissionsSummary {
                event_count: buffers.event_count,
                intent_count: buffers.intent_count,
                projection_count: buffers.projection_count,
                action_count: buffers.action_count,
                event_types: buffers.event_types.iter().cloned().collect(),
                intent_types: buffers.intent_types.iter().cloned().collect(),
                projection_types: buffers.projection_types.iter().cloned().collect(),
                action_types: buffers.action_types.iter().cloned().collect(),
            },
            failures: buffers.failures.clone(),
            metrics,
        }
    }
}

impl std::fmt::Debug for ManifestGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestGenerator")
            .field("manifest_id", &self.manifest_id)
            .field("node_name", &self.node_name)
            .finish_non_exhaustive()
    }
}
