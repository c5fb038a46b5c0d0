// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Composition combinators over [`NodeResult`].
//!
//! All combinators are parameterised by the composer's correlation id for
//! tracing, are deterministic given the same inputs, and never panic: a
//! panicking operation is caught at the combinator boundary and converted
//! into a `Failure`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::warn;
use uuid::Uuid;

use super::result::{
    BackoffStrategy, EmittedEvent, ErrorInfo, ExecutionContext, NodeResult,
};

/// A composable operation: takes a value, returns a `NodeResult` of the
/// same type so it can be threaded through sequences and pipelines.
pub type Op<T> = Arc<dyn Fn(T) -> BoxFuture<'static, NodeResult<T>> + Send + Sync>;

/// Wrap an async closure as an [`Op`].
pub fn op<T, F, Fut>(f: F) -> Op<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = NodeResult<T>> + Send + 'static,
{
    Arc::new(move |value| f(value).boxed())
}

/// Predicate deciding whether a failure is worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&ErrorInfo) -> bool + Send + Sync>;

/// Tuning for [`Composer::retry`].
#[derive(Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Defaults to the error's own `retryable` flag.
    pub predicate: Option<RetryPredicate>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            predicate: None,
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Composition utility for [`NodeResult`] operations.
///
/// One composer per logical workflow; its correlation id threads through
/// every provenance entry and emitted event.
#[derive(Debug, Clone)]
pub struct Composer {
    correlation_id: Uuid,
}

impl Composer {
    #[must_use]
    pub fn new(correlation_id: Uuid) -> Self {
        Self { correlation_id }
    }

    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Execute `ops` sequentially, threading the value through.
    ///
    /// With `fail_fast`, the first failure is returned immediately. With
    /// `collect_errors`, failures are accumulated and execution continues;
    /// if any step failed the final result is a failure aggregating them.
    /// The trust score of the whole is the minimum across the steps.
    pub async fn sequence<T>(
        &self,
        ops: &[Op<T>],
        initial: T,
        fail_fast: bool,
        collect_errors: bool,
    ) -> NodeResult<Vec<T>>
    where
        T: Clone + Send + 'static,
    {
        let started = std::time::Instant::now();
        let mut context = ExecutionContext::new(Some(self.correlation_id));
        context.record_step(format!("sequence.{}", self.correlation_id));
        context
            .metadata
            .insert("operation_count".to_string(), json!(ops.len()));
        context
            .metadata
            .insert("fail_fast".to_string(), json!(fail_fast));
        context
            .metadata
            .insert("collect_errors".to_string(), json!(collect_errors));

        let mut results: Vec<T> = Vec::with_capacity(ops.len());
        let mut errors: Vec<ErrorInfo> = Vec::new();
        let mut current = initial;

        for (i, operation) in ops.iter().enumerate() {
            let step = run_caught(operation, current.clone(), self.correlation_id).await;
            match step {
                NodeResult::Success { value, context: step_ctx } => {
                    context.absorb_trust(step_ctx.trust_score);
                    context.record_step(format!("step.{i}.completed"));
                    results.push(value.clone());
                    current = value;
                }
                NodeResult::Failure { error } => {
                    if collect_errors {
                        warn!(step = i, error = %error.message, "sequence step failed");
                        errors.push(error);
                        continue;
                    }
                    if fail_fast {
                        let mut error = error;
                        error.correlation_id.get_or_insert(self.correlation_id);
                        error.context.insert(
                            "failed_step".to_string(),
                            json!(format!("step.{i}.failed")),
                        );
                        return NodeResult::failure(error);
                    }
                    errors.push(error);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        context
            .metadata
            .insert("duration_ms".to_string(), json!(duration_ms));
        context
            .metadata
            .insert("successful_steps".to_string(), json!(results.len()));
        context
            .metadata
            .insert("failed_steps".to_string(), json!(errors.len()));

        if collect_errors && !errors.is_empty() {
            let aggregated = ErrorInfo::permanent(format!(
                "Sequence completed with {} failures",
                errors.len()
            ))
            .with_correlation_id(self.correlation_id)
            .with_context(
                "errors",
                Value::Array(
                    errors
                        .iter()
                        .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
                        .collect(),
                ),
            )
            .with_context("successful_results", json!(results.len()));
            return NodeResult::failure(aggregated);
        }

        context.events.push(EmittedEvent::new(
            "monadic.sequence.completed",
            json!({
                "operation_count": ops.len(),
                "successful_steps": results.len(),
                "failed_steps": errors.len(),
                "duration_ms": duration_ms,
            }),
        ));
        NodeResult::success(results, context)
    }

    /// Execute `ops[i](inputs[i])` concurrently.
    ///
    /// Concurrency is bounded by `max_concurrency` (unbounded when `None`).
    /// With `fail_fast`, the first failure cancels pending work. On overall
    /// timeout, returns a retryable timeout error (exponential backoff,
    /// three attempts). Results are ordered by original index.
    pub async fn parallel<T>(
        &self,
        ops: &[Op<T>],
        inputs: Vec<T>,
        max_concurrency: Option<usize>,
        fail_fast: bool,
        timeout: Option<Duration>,
    ) -> NodeResult<Vec<T>>
    where
        T: Clone + Send + 'static,
    {
        if ops.len() != inputs.len() {
            return NodeResult::failure(
                ErrorInfo::validation("operations and inputs must have the same length")
                    .with_correlation_id(self.correlation_id),
            );
        }

        let started = std::time::Instant::now();
        let semaphore = max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let correlation_id = self.correlation_id;

        let mut tasks = FuturesUnordered::new();
        for (i, (operation, input)) in ops.iter().zip(inputs).enumerate() {
            let operation = Arc::clone(operation);
            let semaphore = semaphore.clone();
            tasks.push(async move {
                let _permit = match &semaphore {
                    Some(sem) => sem.clone().acquire_owned().await.ok(),
                    None => None,
                };
                let result = run_caught(&operation, input, correlation_id).await;
                (i, result)
            });
        }

        let total = ops.len();
        let gather = async {
            let mut indexed: Vec<(usize, T, f64)> = Vec::with_capacity(total);
            let mut failures: Vec<ErrorInfo> = Vec::new();
            while let Some((i, result)) = tasks.next().await {
                match result {
                    NodeResult::Success { value, context } => {
                        indexed.push((i, value, context.trust_score));
                    }
                    NodeResult::Failure { mut error } => {
                        if fail_fast {
                            error.correlation_id.get_or_insert(correlation_id);
                            error.context.insert(
                                "failed_operation".to_string(),
                                json!(i),
                            );
                            return Err(error);
                        }
                        failures.push(error);
                    }
                }
            }
            Ok((indexed, failures))
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, gather).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Dropping the task set cancels in-flight work.
                    return NodeResult::failure(
                        ErrorInfo::timeout(format!(
                            "Parallel execution timed out after {:?}",
                            limit
                        ))
                        .with_correlation_id(self.correlation_id)
                        .with_backoff(BackoffStrategy::Exponential, 3),
                    );
                }
            },
            None => gather.await,
        };

        let (mut indexed, failures) = match outcome {
            Ok(pair) => pair,
            Err(error) => return NodeResult::failure(error),
        };
        indexed.sort_by_key(|(i, _, _)| *i);
        let values: Vec<T> = indexed.into_iter().map(|(_, v, _)| v).collect();

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut context = ExecutionContext::new(Some(self.correlation_id));
        context.record_step(format!("parallel.{}.completed", self.correlation_id));
        // Parallel composition carries slight uncertainty.
        context.trust_score = 0.9;
        context
            .metadata
            .insert("operation_count".to_string(), json!(total));
        context
            .metadata
            .insert("successful_operations".to_string(), json!(values.len()));
        context
            .metadata
            .insert("failed_operations".to_string(), json!(failures.len()));
        context
            .metadata
            .insert("duration_ms".to_string(), json!(duration_ms));
        context
            .metadata
            .insert("concurrency_limit".to_string(), json!(max_concurrency));
        context.events.push(EmittedEvent::new(
            "monadic.parallel.completed",
            json!({
                "operation_count": total,
                "successful_operations": values.len(),
                "failed_operations": failures.len(),
                "duration_ms": duration_ms,
            }),
        ));
        NodeResult::success(values, context)
    }

    /// Retry `operation` according to `options`.
    ///
    /// The predicate defaults to the error's own `retryable` flag. A
    /// success carries the attempt count in its metadata.
    pub async fn retry<T>(
        &self,
        operation: &Op<T>,
        input: T,
        options: RetryOptions,
    ) -> NodeResult<T>
    where
        T: Clone + Send + 'static,
    {
        let max_attempts = options.max_attempts.max(1);
        let mut last_error: Option<ErrorInfo> = None;

        for attempt in 1..=max_attempts {
            let result = run_caught(operation, input.clone(), self.correlation_id).await;
            match result {
                NodeResult::Success { value, mut context } => {
                    context
                        .metadata
                        .insert("retry_attempts".to_string(), json!(attempt));
                    context
                        .metadata
                        .insert("max_attempts".to_string(), json!(max_attempts));
                    context.metadata.insert(
                        "backoff_strategy".to_string(),
                        serde_json::to_value(options.backoff).unwrap_or(Value::Null),
                    );
                    context.record_step(format!("retry.success.attempt_{attempt}"));
                    return NodeResult::success(value, context);
                }
                NodeResult::Failure { error } => {
                    let should_retry = match &options.predicate {
                        Some(predicate) => predicate(&error),
                        None => error.retryable,
                    };
                    if !should_retry {
                        return NodeResult::failure(error);
                    }
                    last_error = Some(error);
                    if attempt < max_attempts {
                        let delay = backoff_delay(
                            attempt,
                            options.backoff,
                            options.base_delay,
                            options.max_delay,
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let last_message = last_error
            .as_ref()
            .map_or_else(|| "unknown".to_string(), |e| e.message.clone());
        let mut exhausted = ErrorInfo::permanent(format!(
            "Operation failed after {max_attempts} attempts. Last error: {last_message}"
        ))
        .with_correlation_id(self.correlation_id)
        .with_context("attempts", json!(max_attempts))
        .with_context(
            "backoff_strategy",
            serde_json::to_value(options.backoff).unwrap_or(Value::Null),
        );
        if let Some(last) = last_error {
            exhausted.context.insert(
                "last_error".to_string(),
                serde_json::to_value(&last).unwrap_or(Value::Null),
            );
        }
        NodeResult::failure(exhausted)
    }

    /// Run `on_true` or `on_false` depending on `predicate(input)`.
    ///
    /// When `on_false` is absent and the predicate is false, the input is
    /// returned unchanged as a success. The branch taken is recorded in
    /// provenance.
    pub async fn conditional<T>(
        &self,
        predicate: impl Fn(&T) -> bool,
        on_true: &Op<T>,
        on_false: Option<&Op<T>>,
        input: T,
    ) -> NodeResult<T>
    where
        T: Clone + Send + 'static,
    {
        let started = std::time::Instant::now();
        let condition = predicate(&input);
        let (branch, result) = if condition {
            (
                "true_branch",
                run_caught(on_true, input, self.correlation_id).await,
            )
        } else if let Some(on_false) = on_false {
            (
                "false_branch",
                run_caught(on_false, input, self.correlation_id).await,
            )
        } else {
            let mut context = ExecutionContext::new(Some(self.correlation_id));
            context.record_step(format!(
                "conditional.{}.no_false_branch",
                self.correlation_id
            ));
            ("no_false_branch", NodeResult::success(input, context))
        };

        match result {
            NodeResult::Success { value, mut context } => {
                context
                    .metadata
                    .insert("conditional_branch".to_string(), json!(branch));
                context
                    .metadata
                    .insert("condition_result".to_string(), json!(condition));
                context.metadata.insert(
                    "duration_ms".to_string(),
                    json!(started.elapsed().as_millis() as u64),
                );
                context.record_step(format!("conditional.{branch}"));
                NodeResult::success(value, context)
            }
            failure => failure,
        }
    }

    /// Sequential pipeline with periodic checkpoints.
    ///
    /// On failure with rollback enabled, the most recent checkpoint
    /// position is attached to the error context.
    pub async fn pipeline<T>(
        &self,
        ops: &[Op<T>],
        input: T,
        checkpoint_every: Option<usize>,
        rollback_on_failure: bool,
    ) -> NodeResult<T>
    where
        T: Clone + Send + 'static,
    {
        let mut checkpoints: Vec<usize> = Vec::new();
        let mut current = input;

        for (i, operation) in ops.iter().enumerate() {
            if let Some(every) = checkpoint_every {
                if every > 0 && i % every == 0 {
                    checkpoints.push(i);
                }
            }

            match run_caught(operation, current.clone(), self.correlation_id).await {
                NodeResult::Success { value, .. } => current = value,
                NodeResult::Failure { mut error } => {
                    if rollback_on_failure {
                        if let Some(checkpoint) = checkpoints.last() {
                            error
                                .context
                                .insert("rollback_to_checkpoint".to_string(), json!(checkpoint));
                            error
                                .context
                                .insert("pipeline_position".to_string(), json!(i));
                            error.context.insert(
                                "checkpoint_count".to_string(),
                                json!(checkpoints.len()),
                            );
                        }
                    }
                    return NodeResult::failure(error);
                }
            }
        }

        let mut context = ExecutionContext::new(Some(self.correlation_id));
        context.record_step(format!("pipeline.{}.completed", self.correlation_id));
        context.trust_score = 0.95;
        context
            .metadata
            .insert("pipeline_length".to_string(), json!(ops.len()));
        context
            .metadata
            .insert("checkpoint_count".to_string(), json!(checkpoints.len()));
        context
            .metadata
            .insert("enable_rollback".to_string(), json!(rollback_on_failure));
        NodeResult::success(current, context)
    }
}

/// Run an op, converting a panic into a permanent failure.
async fn run_caught<T>(operation: &Op<T>, input: T, correlation_id: Uuid) -> NodeResult<T> {
    match std::panic::AssertUnwindSafe(operation(input))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => NodeResult::failure(
            ErrorInfo::permanent(format!("operation panicked: {}", panic_message(&payload)))
                .with_correlation_id(correlation_id),
        ),
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

fn backoff_delay(
    attempt: u32,
    strategy: BackoffStrategy,
    base: Duration,
    max: Duration,
) -> Duration {
    let delay = match strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.saturating_mul(attempt),
        BackoffStrategy::Exponential => base.saturating_mul(1_u32 << (attempt - 1).min(31)),
    };
    delay.min(max)
}
