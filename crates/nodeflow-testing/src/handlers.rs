//! Canned tool handlers for dispatcher tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodeflow::service::{ToolHandler, ToolInput};
use nodeflow::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;

/// Returns a fixed value and counts calls.
pub struct StaticHandler {
    response: Value,
    calls: AtomicUsize,
    inputs: Mutex<Vec<ToolInput>>,
}

impl StaticHandler {
    #[must_use]
    pub fn new(response: Value) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs seen so far, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<ToolInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl ToolHandler for StaticHandler {
    async fn run(&self, input: ToolInput) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input);
        Ok(self.response.clone())
    }
}

/// Always fails; optionally by panicking.
pub struct FailingHandler {
    message: String,
    panics: bool,
}

impl FailingHandler {
    #[must_use]
    pub fn erroring(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
            panics: false,
        })
    }

    #[must_use]
    pub fn panicking(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
            panics: true,
        })
    }
}

#[async_trait]
impl ToolHandler for FailingHandler {
    async fn run(&self, _input: ToolInput) -> Result<Value> {
        if self.panics {
            panic!("{}", self.message.clone());
        }
        Err(Error::OperationFailed(self.message.clone()))
    }
}

/// Sleeps before responding; for timeout and drain tests.
pub struct SlowHandler {
    delay: Duration,
    response: Value,
}

impl SlowHandler {
    #[must_use]
    pub fn new(delay: Duration, response: Value) -> Arc<Self> {
        Arc::new(Self { delay, response })
    }
}

#[async_trait]
impl ToolHandler for SlowHandler {
    async fn run(&self, _input: ToolInput) -> Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(self.response.clone())
    }
}
