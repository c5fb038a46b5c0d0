// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Tool handler seam between the dispatcher and user code.
//!
//! A handler receives a [`ToolInput`] (the open record built from an
//! invocation event) and returns a JSON value. Typed handlers deserialize
//! the input into their own shape with [`ToolInput::decode`]. Synchronous
//! handlers are wrapped in [`BlockingToolHandler`] so the dispatcher task
//! is never blocked.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Open-record input for one tool invocation: the action plus the event
/// parameters.
#[derive(Debug, Clone)]
pub struct ToolInput {
    pub action: String,
    pub parameters: Map<String, Value>,
}

impl ToolInput {
    #[must_use]
    pub fn new(action: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            parameters,
        }
    }

    /// Construct a declared input shape from `{action, ...parameters}`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut record = self.parameters.clone();
        record.insert("action".to_string(), Value::from(self.action.clone()));
        serde_json::from_value(Value::Object(record))
            .map_err(|e| Error::Validation(format!("invalid tool input: {e}")))
    }

    /// A single parameter, if present.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

/// User-provided tool implementation.
///
/// The returned value is serialised by the dispatcher: objects pass
/// through, scalars and arrays are wrapped as `{"result": value}`, and
/// `null` produces an error response.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, input: ToolInput) -> Result<Value>;
}

/// Adapter for async closures.
pub struct FnToolHandler {
    run: Box<dyn Fn(ToolInput) -> BoxFuture<'static, Result<Value>> + Send + Sync>,
}

impl FnToolHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            run: Box::new(move |input| Box::pin(f(input))),
        }
    }
}

#[async_trait]
impl ToolHandler for FnToolHandler {
    async fn run(&self, input: ToolInput) -> Result<Value> {
        (self.run)(input).await
    }
}

impl std::fmt::Debug for FnToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnToolHandler").finish_non_exhaustive()
    }
}

/// Adapter dispatching a synchronous handler to the blocking pool.
pub struct BlockingToolHandler {
    run: Arc<dyn Fn(ToolInput) -> Result<Value> + Send + Sync>,
}

impl BlockingToolHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ToolInput) -> Result<Value> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f) }
    }
}

#[async_trait]
impl ToolHandler for BlockingToolHandler {
    async fn run(&self, input: ToolInput) -> Result<Value> {
        let run = Arc::clone(&self.run);
        tokio::task::spawn_blocking(move || run(input))
            .await
            .map_err(|e| Error::OperationFailed(format!("blocking handler aborted: {e}")))?
    }
}

impl std::fmt::Debug for BlockingToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingToolHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct IndexInput {
        action: String,
        shard: u32,
    }

    #[test]
    fn test_decode_typed_input() {
        let mut parameters = Map::new();
        parameters.insert("shard".to_string(), json!(3));
        let input = ToolInput::new("rebuild", parameters);

        let decoded: IndexInput = input.decode().unwrap();
        assert_eq!(decoded.action, "rebuild");
        assert_eq!(decoded.shard, 3);
    }

    #[test]
    fn test_decode_invalid_input_is_validation_error() {
        let input = ToolInput::new("rebuild", Map::new());
        let err = input.decode::<IndexInput>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_fn_handler_runs() {
        let handler = FnToolHandler::new(|input: ToolInput| async move {
            Ok(json!({"echo": input.action}))
        });
        let result = handler.run(ToolInput::new("ping", Map::new())).await.unwrap();
        assert_eq!(result, json!({"echo": "ping"}));
    }

    #[tokio::test]
    async fn test_blocking_handler_runs_off_loop() {
        let handler = BlockingToolHandler::new(|input: ToolInput| {
            // Would block a dispatcher task; fine on the blocking pool.
            std::thread::sleep(std::time::Duration::from_millis(10));
            Ok(json!({"action": input.action}))
        });
        let result = handler.run(ToolInput::new("work", Map::new())).await.unwrap();
        assert_eq!(result, json!({"action": "work"}));
    }
}
