// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `NodeResult<T>` - the typed success/failure sum threaded through node
//! operations, carrying provenance, logs, trust score, and emitted events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input constraints violated; never retried.
    Validation,
    /// Not expected to succeed on retry.
    Permanent,
    /// Recoverable failure; retried by default.
    Transient,
    /// Deadline exceeded; retried with exponential backoff by default.
    Timeout,
}

/// Delay schedule used between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// A failure with enough context to decide on retry and to trace it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub retryable: bool,
    pub backoff: BackoffStrategy,
    pub max_attempts: u32,
    /// Free-form context (aggregated errors, checkpoint positions, ...).
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let (retryable, backoff) = match kind {
            ErrorKind::Validation | ErrorKind::Permanent => (false, BackoffStrategy::Fixed),
            ErrorKind::Transient => (true, BackoffStrategy::Linear),
            ErrorKind::Timeout => (true, BackoffStrategy::Exponential),
        };
        Self {
            kind,
            message: message.into(),
            trace: None,
            correlation_id: None,
            retryable,
            backoff,
            max_attempts: 3,
            context: Map::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy, max_attempts: u32) -> Self {
        self.backoff = backoff;
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Log severity carried in an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One log line attached to a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// An event emitted alongside a successful result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl EmittedEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }
}

/// Everything a success knows about how it was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Ordered named steps that produced the value.
    pub provenance: Vec<String>,
    pub logs: Vec<LogEntry>,
    /// In `[0, 1]`; composition takes the minimum across steps.
    pub trust_score: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub events: Vec<EmittedEvent>,
}

impl ExecutionContext {
    pub fn new(correlation_id: Option<Uuid>) -> Self {
        Self {
            provenance: Vec::new(),
            logs: Vec::new(),
            trust_score: 1.0,
            timestamp: Utc::now(),
            metadata: Map::new(),
            correlation_id,
            events: Vec::new(),
        }
    }

    /// Append a provenance step.
    pub fn record_step(&mut self, step: impl Into<String>) {
        self.provenance.push(step.into());
    }

    /// Clamp-and-merge a step's trust score (minimum propagation).
    pub fn absorb_trust(&mut self, other: f64) {
        self.trust_score = self.trust_score.min(other.clamp(0.0, 1.0));
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Typed success/failure for node operations.
///
/// A `Success` carries the value and its [`ExecutionContext`]; a `Failure`
/// carries an [`ErrorInfo`]. Combinators over this type never panic and
/// never raise; exceptions at combinator boundaries become `Failure`.
#[derive(Debug, Clone)]
pub enum NodeResult<T> {
    Success {
        value: T,
        context: ExecutionContext,
    },
    Failure {
        error: ErrorInfo,
    },
}

impl<T> NodeResult<T> {
    /// A success with a default context.
    pub fn ok(value: T) -> Self {
        NodeResult::Success {
            value,
            context: ExecutionContext::default(),
        }
    }

    pub fn success(value: T, context: ExecutionContext) -> Self {
        NodeResult::Success { value, context }
    }

    pub fn failure(error: ErrorInfo) -> Self {
        NodeResult::Failure { error }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, NodeResult::Success { .. })
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            NodeResult::Success { value, .. } => Some(value),
            NodeResult::Failure { .. } => None,
        }
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        match self {
            NodeResult::Success { context, .. } => Some(context),
            NodeResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            NodeResult::Success { .. } => None,
            NodeResult::Failure { error } => Some(error),
        }
    }

    /// Map the success value, preserving the context.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> NodeResult<U> {
        match self {
            NodeResult::Success { value, context } => NodeResult::Success {
                value: f(value),
                context,
            },
            NodeResult::Failure { error } => NodeResult::Failure { error },
        }
    }

    /// Chain another fallible step, merging provenance into its context.
    pub fn and_then<U>(self, f: impl FnOnce(T, ExecutionContext) -> NodeResult<U>) -> NodeResult<U> {
        match self {
            NodeResult::Success { value, context } => f(value, context),
            NodeResult::Failure { error } => NodeResult::Failure { error },
        }
    }

    /// Unwrap the value; panics on failure. Test helper.
    #[cfg(test)]
    pub fn into_value(self) -> T {
        match self {
            NodeResult::Success { value, .. } => value,
            NodeResult::Failure { error } => panic!("called into_value on failure: {}", error.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_defaults() {
        assert!(!ErrorInfo::validation("bad").retryable);
        assert!(!ErrorInfo::permanent("broken").retryable);
        assert!(ErrorInfo::transient("flaky").retryable);

        let timeout = ErrorInfo::timeout("slow");
        assert!(timeout.retryable);
        assert_eq!(timeout.backoff, BackoffStrategy::Exponential);
    }

    #[test]
    fn test_trust_absorption_clamps() {
        let mut ctx = ExecutionContext::default();
        ctx.absorb_trust(0.7);
        assert_eq!(ctx.trust_score, 0.7);
        ctx.absorb_trust(1.5);
        assert_eq!(ctx.trust_score, 0.7);
        ctx.absorb_trust(-0.1);
        assert_eq!(ctx.trust_score, 0.0);
    }

    #[test]
    fn test_map_preserves_context() {
        let mut ctx = ExecutionContext::default();
        ctx.record_step("load");
        let result = NodeResult::success(2_u64, ctx).map(|v| v * 3);
        assert_eq!(result.value(), Some(&6));
        assert_eq!(result.context().unwrap().provenance, vec!["load".to_string()]);
    }

    #[test]
    fn test_failure_short_circuits_and_then() {
        let result: NodeResult<u64> = NodeResult::failure(ErrorInfo::permanent("nope"));
        let chained = result.and_then(|v, ctx| NodeResult::success(v + 1, ctx));
        assert!(chained.is_failure());
        assert_eq!(chained.error().unwrap().message, "nope");
    }

    #[test]
    fn test_error_serialization_round_trip() {
        let err = ErrorInfo::timeout("deadline")
            .with_correlation_id(Uuid::new_v4())
            .with_context("attempts", Value::from(3));
        let json = serde_json::to_string(&err).unwrap();
        let parsed: ErrorInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, ErrorKind::Timeout);
        assert_eq!(parsed.context["attempts"], Value::from(3));
    }
}
