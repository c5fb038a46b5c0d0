// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Side-effect execution with transactions, retries, and circuit breakers.
//!
//! The [`EffectExecutor`] is the single entry point for managed side
//! effects: it gates execution through per-service circuit breakers, wraps
//! handlers in transactions with rollback support, retries with
//! exponential backoff, and caps concurrency with a semaphore.

mod circuit_breaker;
mod handlers;
mod transaction;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use handlers::{EffectHandler, EventEmissionHandler, FileOperationHandler};
pub use transaction::{RollbackFn, Transaction, TransactionOperation, TransactionState};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::config::EffectConfig;
use crate::error::{Error, Result};

/// Kinds of side effects the executor can manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    FileOperation,
    DatabaseOperation,
    ApiCall,
    EventEmission,
    DirectoryOperation,
    TicketStorage,
    MetricsCollection,
}

impl fmt::Display for EffectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectType::FileOperation => "file_operation",
            EffectType::DatabaseOperation => "database_operation",
            EffectType::ApiCall => "api_call",
            EffectType::EventEmission => "event_emission",
            EffectType::DirectoryOperation => "directory_operation",
            EffectType::TicketStorage => "ticket_storage",
            EffectType::MetricsCollection => "metrics_collection",
        };
        f.write_str(name)
    }
}

/// Typed input for one effect execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectInput {
    pub effect_type: EffectType,
    pub operation_data: Map<String, Value>,
    pub operation_id: String,
    pub transaction_enabled: bool,
    pub retry_enabled: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub circuit_breaker_enabled: bool,
    pub timeout_ms: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EffectInput {
    pub fn new(effect_type: EffectType, operation_data: Map<String, Value>) -> Self {
        Self {
            effect_type,
            operation_data,
            operation_id: Uuid::new_v4().to_string(),
            transaction_enabled: true,
            retry_enabled: true,
            max_retries: 3,
            retry_delay_ms: 1_000,
            circuit_breaker_enabled: false,
            timeout_ms: 30_000,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    #[must_use]
    pub fn with_transaction(mut self, enabled: bool) -> Self {
        self.transaction_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.retry_enabled = max_retries > 0;
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    #[must_use]
    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Typed output of one effect execution.
#[derive(Debug, Clone, Serialize)]
pub struct EffectOutput {
    pub result: Value,
    pub operation_id: String,
    pub effect_type: EffectType,
    pub transaction_state: TransactionState,
    pub processing_time_ms: f64,
    pub retry_count: u32,
    pub side_effects_applied: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// Aggregated per-effect-type metrics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EffectTypeMetrics {
    pub total_operations: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_processing_time_ms: f64,
    pub min_processing_time_ms: f64,
    pub max_processing_time_ms: f64,
}

impl Default for EffectTypeMetrics {
    fn default() -> Self {
        Self {
            total_operations: 0,
            success_count: 0,
            error_count: 0,
            avg_processing_time_ms: 0.0,
            min_processing_time_ms: f64::INFINITY,
            max_processing_time_ms: 0.0,
        }
    }
}

/// Circuit breaker gauges in an executor metrics snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BreakerMetrics {
    pub state: CircuitBreakerState,
    pub failure_count: u32,
}

/// Executor-wide metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorMetrics {
    pub effects: HashMap<String, EffectTypeMetrics>,
    pub circuit_breakers: HashMap<String, BreakerMetrics>,
    pub active_transactions: usize,
    pub max_concurrent_effects: usize,
    pub available_permits: usize,
}

/// Transactional side-effect executor with pluggable handlers.
pub struct EffectExecutor {
    config: EffectConfig,
    handlers: RwLock<HashMap<EffectType, Arc<dyn EffectHandler>>>,
    active_transactions: Arc<DashMap<String, Arc<Transaction>>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    semaphore: Arc<Semaphore>,
    metrics: Mutex<HashMap<String, EffectTypeMetrics>>,
}

impl EffectExecutor {
    #[must_use]
    pub fn new(config: EffectConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_effects.max(1)));
        let executor = Self {
            config,
            handlers: RwLock::new(HashMap::new()),
            active_transactions: Arc::new(DashMap::new()),
            breakers: DashMap::new(),
            semaphore,
            metrics: Mutex::new(HashMap::new()),
        };
        executor.register_handler(EffectType::FileOperation, Arc::new(FileOperationHandler));
        executor
    }

    /// Attach an event bus, enabling the event-emission handler.
    #[must_use]
    pub fn with_event_bus(self, bus: Arc<dyn EventBus>) -> Self {
        self.register_handler(
            EffectType::EventEmission,
            Arc::new(EventEmissionHandler::new(bus)),
        );
        self
    }

    /// Register (or replace) the handler for an effect type.
    pub fn register_handler(&self, effect_type: EffectType, handler: Arc<dyn EffectHandler>) {
        self.handlers.write().insert(effect_type, handler);
    }

    /// The circuit breaker for a service key, created on first use.
    pub fn circuit_breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.circuit_breaker.clone())))
            .clone()
    }

    /// Execute one side effect.
    pub async fn execute(&self, input: EffectInput) -> Result<EffectOutput> {
        let started = Instant::now();

        if input.operation_id.is_empty() {
            return Err(Error::Validation("operation_id must not be empty".to_string()));
        }

        let breaker = if input.circuit_breaker_enabled {
            let breaker = self.circuit_breaker(&input.effect_type.to_string());
            if !breaker.can_execute() {
                return Err(Error::OperationFailed(format!(
                    "circuit breaker open for {}",
                    input.effect_type
                )));
            }
            Some(breaker)
        } else {
            None
        };

        let transaction = if input.transaction_enabled {
            let transaction = Arc::new(Transaction::new(input.operation_id.clone()));
            transaction.activate();
            self.active_transactions
                .insert(input.operation_id.clone(), Arc::clone(&transaction));
            Some(transaction)
        } else {
            None
        };

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::OperationFailed("effect executor shut down".to_string()))?;
        let outcome = self
            .run_with_retry(&input, transaction.as_deref())
            .await;
        drop(permit);

        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok((result, retry_count)) => {
                let transaction_state = match &transaction {
                    Some(transaction) => {
                        transaction.commit();
                        self.active_transactions.remove(&input.operation_id);
                        transaction.state()
                    }
                    None => TransactionState::Committed,
                };
                if let Some(breaker) = &breaker {
                    breaker.record_success();
                }
                self.update_metrics(&input.effect_type.to_string(), processing_time_ms, true);

                let side_effects_applied = transaction
                    .as_ref()
                    .map(|t| t.operations().iter().map(|op| op.name.clone()).collect())
                    .unwrap_or_default();

                let mut metadata = input.metadata.clone();
                metadata.insert("timeout_ms".to_string(), Value::from(input.timeout_ms));
                metadata.insert(
                    "transaction_enabled".to_string(),
                    Value::from(input.transaction_enabled),
                );
                metadata.insert(
                    "circuit_breaker_enabled".to_string(),
                    Value::from(input.circuit_breaker_enabled),
                );

                Ok(EffectOutput {
                    result,
                    operation_id: input.operation_id,
                    effect_type: input.effect_type,
                    transaction_state,
                    processing_time_ms,
                    retry_count,
                    side_effects_applied,
                    metadata,
                })
            }
            Err(err) => {
                if let Some(transaction) = &transaction {
                    transaction.rollback();
                    self.active_transactions.remove(&input.operation_id);
                }
                if let Some(breaker) = &breaker {
                    breaker.record_failure();
                }
                self.update_metrics(&input.effect_type.to_string(), processing_time_ms, false);
                Err(Error::OperationFailed(format!(
                    "effect execution failed: {err}"
                )))
            }
        }
    }

    /// Begin a standalone transaction tracked by this executor.
    ///
    /// The returned scope commits explicitly; dropping it without a commit
    /// rolls the transaction back.
    pub fn transaction_scope(&self, operation_id: Option<String>) -> TransactionScope {
        let id = operation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let transaction = Arc::new(Transaction::new(id.clone()));
        transaction.activate();
        self.active_transactions.insert(id, Arc::clone(&transaction));
        TransactionScope {
            transaction,
            registry: Arc::clone(&self.active_transactions),
            committed: false,
        }
    }

    /// Roll back every still-active transaction. Used during shutdown.
    pub fn rollback_active_transactions(&self) -> usize {
        let ids: Vec<String> = self
            .active_transactions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut rolled_back = 0;
        for id in ids {
            if let Some((_, transaction)) = self.active_transactions.remove(&id) {
                warn!(transaction_id = %id, "rolling back active transaction during cleanup");
                transaction.rollback();
                rolled_back += 1;
            }
        }
        rolled_back
    }

    /// Number of transactions currently active.
    #[must_use]
    pub fn active_transaction_count(&self) -> usize {
        self.active_transactions.len()
    }

    /// Metrics snapshot covering effects, breakers, and transactions.
    pub fn metrics(&self) -> ExecutorMetrics {
        let effects = self.metrics.lock().clone();
        let circuit_breakers = self
            .breakers
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    BreakerMetrics {
                        state: entry.value().state(),
                        failure_count: entry.value().failure_count(),
                    },
                )
            })
            .collect();
        ExecutorMetrics {
            effects,
            circuit_breakers,
            active_transactions: self.active_transactions.len(),
            max_concurrent_effects: self.config.max_concurrent_effects,
            available_permits: self.semaphore.available_permits(),
        }
    }

    async fn run_with_retry(
        &self,
        input: &EffectInput,
        transaction: Option<&Transaction>,
    ) -> Result<(Value, u32)> {
        let handler = {
            let handlers = self.handlers.read();
            handlers.get(&input.effect_type).cloned()
        }
        .ok_or_else(|| {
            Error::OperationFailed(format!(
                "no handler registered for effect type: {}",
                input.effect_type
            ))
        })?;

        let mut retry_count = 0;
        loop {
            let attempt = handler.execute(&input.operation_data, transaction);
            let result = if input.timeout_ms > 0 {
                match tokio::time::timeout(Duration::from_millis(input.timeout_ms), attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "effect {} exceeded {}ms",
                        input.operation_id, input.timeout_ms
                    ))),
                }
            } else {
                attempt.await
            };

            match result {
                Ok(value) => return Ok((value, retry_count)),
                Err(err) => {
                    if !input.retry_enabled || retry_count >= input.max_retries {
                        return Err(err);
                    }
                    retry_count += 1;
                    let delay_ms = input
                        .retry_delay_ms
                        .saturating_mul(1_u64 << (retry_count - 1).min(31));
                    warn!(
                        operation_id = %input.operation_id,
                        retry = retry_count,
                        max_retries = input.max_retries,
                        error = %err,
                        "effect retry"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    fn update_metrics(&self, effect_type: &str, processing_time_ms: f64, success: bool) {
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(effect_type.to_string()).or_default();
        entry.total_operations += 1;
        if success {
            entry.success_count += 1;
        } else {
            entry.error_count += 1;
        }
        entry.min_processing_time_ms = entry.min_processing_time_ms.min(processing_time_ms);
        entry.max_processing_time_ms = entry.max_processing_time_ms.max(processing_time_ms);
        let total = entry.total_operations as f64;
        entry.avg_processing_time_ms =
            (entry.avg_processing_time_ms * (total - 1.0) + processing_time_ms) / total;
        debug!(effect_type, processing_time_ms, success, "effect metrics updated");
    }
}

impl fmt::Debug for EffectExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectExecutor")
            .field("active_transactions", &self.active_transactions.len())
            .field("max_concurrent_effects", &self.config.max_concurrent_effects)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`EffectExecutor::transaction_scope`].
pub struct TransactionScope {
    transaction: Arc<Transaction>,
    registry: Arc<DashMap<String, Arc<Transaction>>>,
    committed: bool,
}

impl TransactionScope {
    /// The transaction being tracked.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Commit and stop tracking.
    pub fn commit(mut self) {
        self.transaction.commit();
        self.registry
            .remove(self.transaction.transaction_id());
        self.committed = true;
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.committed {
            self.registry
                .remove(self.transaction.transaction_id());
            self.transaction.rollback();
        }
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("transaction_id", &self.transaction.transaction_id())
            .field("committed", &self.committed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl EffectHandler for CountingHandler {
        async fn execute(
            &self,
            _operation: &Map<String, Value>,
            _transaction: Option<&Transaction>,
        ) -> Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(Error::OperationFailed("injected failure".to_string()))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    fn executor() -> EffectExecutor {
        EffectExecutor::new(EffectConfig::default())
    }

    fn input_for(effect_type: EffectType) -> EffectInput {
        EffectInput::new(effect_type, Map::new()).with_retries(0, 1)
    }

    #[tokio::test]
    async fn test_execute_success_commits_transaction() {
        let executor = executor();
        let calls = Arc::new(AtomicU32::new(0));
        executor.register_handler(
            EffectType::ApiCall,
            Arc::new(CountingHandler {
                calls: Arc::clone(&calls),
                fail_first: 0,
            }),
        );

        let output = executor
            .execute(input_for(EffectType::ApiCall))
            .await
            .unwrap();
        assert_eq!(output.result, json!({"ok": true}));
        assert_eq!(output.transaction_state, TransactionState::Committed);
        assert_eq!(output.retry_count, 0);
        assert_eq!(executor.active_transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_then_success() {
        let executor = executor();
        let calls = Arc::new(AtomicU32::new(0));
        executor.register_handler(
            EffectType::ApiCall,
            Arc::new(CountingHandler {
                calls: Arc::clone(&calls),
                fail_first: 2,
            }),
        );

        let input = EffectInput::new(EffectType::ApiCall, Map::new()).with_retries(3, 1);
        let output = executor.execute(input).await.unwrap();
        assert_eq!(output.retry_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_propagate_failure() {
        let executor = executor();
        executor.register_handler(
            EffectType::ApiCall,
            Arc::new(CountingHandler {
                calls: Arc::new(AtomicU32::new(0)),
                fail_first: u32::MAX,
            }),
        );

        let input = EffectInput::new(EffectType::ApiCall, Map::new()).with_retries(1, 1);
        let err = executor.execute(input).await.unwrap_err();
        assert!(err.to_string().contains("effect execution failed"));

        let metrics = executor.metrics();
        assert_eq!(metrics.effects["api_call"].error_count, 1);
    }

    #[tokio::test]
    async fn test_missing_handler_fails() {
        let executor = executor();
        let err = executor
            .execute(input_for(EffectType::DatabaseOperation))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no handler registered"));
    }

    #[tokio::test]
    async fn test_circuit_breaker_gates_execution() {
        let config = EffectConfig {
            circuit_breaker: crate::config::CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_attempts: 3,
            },
            ..Default::default()
        };
        let executor = EffectExecutor::new(config);
        executor.register_handler(
            EffectType::ApiCall,
            Arc::new(CountingHandler {
                calls: Arc::new(AtomicU32::new(0)),
                fail_first: u32::MAX,
            }),
        );

        for _ in 0..2 {
            let input = input_for(EffectType::ApiCall).with_circuit_breaker(true);
            let _ = executor.execute(input).await;
        }
        assert_eq!(
            executor.circuit_breaker("api_call").state(),
            CircuitBreakerState::Open
        );

        let input = input_for(EffectType::ApiCall).with_circuit_breaker(true);
        let err = executor.execute(input).await.unwrap_err();
        assert!(err.to_string().contains("circuit breaker open"));
    }

    #[tokio::test]
    async fn test_timeout_fails_effect() {
        struct SlowHandler;
        #[async_trait]
        impl EffectHandler for SlowHandler {
            async fn execute(
                &self,
                _operation: &Map<String, Value>,
                _transaction: Option<&Transaction>,
            ) -> Result<Value> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            }
        }

        let executor = executor();
        executor.register_handler(EffectType::ApiCall, Arc::new(SlowHandler));
        let input = input_for(EffectType::ApiCall).with_timeout_ms(20);
        let err = executor.execute(input).await.unwrap_err();
        assert!(err.to_string().contains("effect execution failed"));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_transaction() {
        struct RecordingHandler {
            rolled_back: Arc<AtomicU32>,
        }
        #[async_trait]
        impl EffectHandler for RecordingHandler {
            async fn execute(
                &self,
                _operation: &Map<String, Value>,
                transaction: Option<&Transaction>,
            ) -> Result<Value> {
                let rolled_back = Arc::clone(&self.rolled_back);
                if let Some(transaction) = transaction {
                    transaction.add_operation(
                        "probe",
                        Map::new(),
                        Some(Box::new(move || {
                            rolled_back.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })),
                    );
                }
                Err(Error::OperationFailed("after side effect".to_string()))
            }
        }

        let executor = executor();
        let rolled_back = Arc::new(AtomicU32::new(0));
        executor.register_handler(
            EffectType::ApiCall,
            Arc::new(RecordingHandler {
                rolled_back: Arc::clone(&rolled_back),
            }),
        );

        let input = input_for(EffectType::ApiCall);
        let _ = executor.execute(input).await.unwrap_err();
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);
        assert_eq!(executor.active_transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_transaction_scope_commit_and_drop() {
        let executor = executor();

        let scope = executor.transaction_scope(Some("scoped".to_string()));
        assert_eq!(executor.active_transaction_count(), 1);
        scope.commit();
        assert_eq!(executor.active_transaction_count(), 0);

        let rolled_back = Arc::new(AtomicU32::new(0));
        {
            let scope = executor.transaction_scope(None);
            let rolled_back = Arc::clone(&rolled_back);
            scope.transaction().add_operation(
                "undoable",
                Map::new(),
                Some(Box::new(move || {
                    rolled_back.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            );
        }
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);
        assert_eq!(executor.active_transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_rollback_active_transactions_on_cleanup() {
        let executor = executor();
        let _scope_a = executor.transaction_scope(Some("a".to_string()));
        let _scope_b = executor.transaction_scope(Some("b".to_string()));
        assert_eq!(executor.rollback_active_transactions(), 2);
        assert_eq!(executor.active_transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let executor = executor();
        executor.register_handler(
            EffectType::ApiCall,
            Arc::new(CountingHandler {
                calls: Arc::new(AtomicU32::new(0)),
                fail_first: 0,
            }),
        );
        executor
            .execute(input_for(EffectType::ApiCall))
            .await
            .unwrap();

        let metrics = executor.metrics();
        assert_eq!(metrics.effects["api_call"].success_count, 1);
        assert_eq!(metrics.max_concurrent_effects, 10);
        assert_eq!(metrics.available_permits, 10);
    }
}
