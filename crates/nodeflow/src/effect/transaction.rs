// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Transaction tracking for side-effect operations.
//!
//! A transaction records the operations applied inside an effect execution
//! and their rollback thunks. On rollback, thunks run in strict reverse
//! insertion order; a failing thunk is logged and does not stop the rest.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

use crate::error::Result;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Active,
    Committed,
    RolledBack,
    Failed,
}

/// One applied operation inside a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOperation {
    pub name: String,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Undo thunk registered alongside an operation.
pub type RollbackFn = Box<dyn FnOnce() -> Result<()> + Send>;

struct TransactionInner {
    state: TransactionState,
    operations: Vec<TransactionOperation>,
    rollbacks: Vec<(String, Option<RollbackFn>)>,
    committed_at: Option<DateTime<Utc>>,
}

/// Rollback-capable operation log. Single-owner: only the task that
/// created a transaction mutates it.
pub struct Transaction {
    transaction_id: String,
    started_at: DateTime<Utc>,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    #[must_use]
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            started_at: Utc::now(),
            inner: Mutex::new(TransactionInner {
                state: TransactionState::Pending,
                operations: Vec::new(),
                rollbacks: Vec::new(),
                committed_at: None,
            }),
        }
    }

    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().committed_at
    }

    /// Mark the transaction active. Called once by the executor.
    pub fn activate(&self) {
        self.inner.lock().state = TransactionState::Active;
    }

    /// Record an applied operation with an optional rollback thunk.
    pub fn add_operation(
        &self,
        name: impl Into<String>,
        data: Map<String, Value>,
        rollback: Option<RollbackFn>,
    ) {
        let name = name.into();
        let mut inner = self.inner.lock();
        inner.operations.push(TransactionOperation {
            name: name.clone(),
            data,
            timestamp: Utc::now(),
        });
        inner.rollbacks.push((name, rollback));
    }

    /// Snapshot of the applied operations.
    #[must_use]
    pub fn operations(&self) -> Vec<TransactionOperation> {
        self.inner.lock().operations.clone()
    }

    /// Mark the transaction committed.
    pub fn commit(&self) {
        let mut inner = self.inner.lock();
        inner.state = TransactionState::Committed;
        inner.committed_at = Some(Utc::now());
    }

    /// Run rollback thunks in strict reverse insertion order.
    ///
    /// Thunk errors are logged and counted; they never interrupt the chain.
    /// Returns how many thunks failed.
    pub fn rollback(&self) -> usize {
        let rollbacks = {
            let mut inner = self.inner.lock();
            inner.state = TransactionState::RolledBack;
            std::mem::take(&mut inner.rollbacks)
        };

        let mut failures = 0;
        for (name, rollback) in rollbacks.into_iter().rev() {
            let Some(rollback) = rollback else { continue };
            if let Err(err) = rollback() {
                failures += 1;
                error!(
                    transaction_id = %self.transaction_id,
                    operation = %name,
                    error = %err,
                    "rollback operation failed"
                );
            }
        }
        failures
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("transaction_id", &self.transaction_id)
            .field("state", &inner.state)
            .field("operations", &inner.operations.len())
            .finish_non_exhaustive()
    }
}
