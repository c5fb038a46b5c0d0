// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Built-in effect handlers: atomic file operations and event emission.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::bus::{BusEvent, EventBus, StateChangeEvent};
use crate::error::{Error, Result};

use super::transaction::Transaction;

/// One pluggable side-effect implementation.
///
/// Handlers receive the raw operation map and the surrounding transaction
/// (when enabled) so they can register rollback thunks for what they apply.
#[async_trait]
pub trait EffectHandler: Send + Sync {
    async fn execute(
        &self,
        operation: &Map<String, Value>,
        transaction: Option<&Transaction>,
    ) -> Result<Value>;
}

/// File operations (read/write/delete) with atomic replace and rollback.
#[derive(Debug, Default)]
pub struct FileOperationHandler;

impl FileOperationHandler {
    fn required_str<'a>(operation: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
        operation
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation(format!("file operation requires string '{key}'")))
    }

    async fn read(path: &Path) -> Result<Value> {
        if !path.exists() {
            return Err(Error::ResourceUnavailable(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let content = tokio::fs::read_to_string(path).await?;
        Ok(json!({
            "operation_type": "read",
            "file_path": path.display().to_string(),
            "content": content,
            "size_bytes": content.len(),
        }))
    }

    async fn write(
        path: &Path,
        data: &str,
        atomic: bool,
        transaction: Option<&Transaction>,
    ) -> Result<Value> {
        if atomic {
            let temp_path = temp_sibling(path);
            let write_result = async {
                tokio::fs::write(&temp_path, data).await?;
                tokio::fs::rename(&temp_path, path).await?;
                Ok::<(), Error>(())
            }
            .await;
            if let Err(err) = write_result {
                let _ = std::fs::remove_file(&temp_path);
                return Err(err);
            }

            if let Some(transaction) = transaction {
                let undo_path = path.to_path_buf();
                let mut op_data = Map::new();
                op_data.insert(
                    "file_path".to_string(),
                    Value::from(path.display().to_string()),
                );
                transaction.add_operation(
                    "write",
                    op_data,
                    Some(Box::new(move || {
                        if undo_path.exists() {
                            std::fs::remove_file(&undo_path)?;
                        }
                        Ok(())
                    })),
                );
            }
        } else {
            tokio::fs::write(path, data).await?;
        }

        Ok(json!({
            "operation_type": "write",
            "file_path": path.display().to_string(),
            "bytes_written": data.len(),
        }))
    }

    async fn delete(path: &Path, transaction: Option<&Transaction>) -> Result<Value> {
        if !path.exists() {
            return Ok(json!({
                "operation_type": "delete",
                "file_path": path.display().to_string(),
                "deleted": false,
            }));
        }

        let backup = if transaction.is_some() {
            Some(tokio::fs::read_to_string(path).await?)
        } else {
            None
        };

        tokio::fs::remove_file(path).await?;

        if let (Some(transaction), Some(content)) = (transaction, backup) {
            let restore_path = path.to_path_buf();
            let mut op_data = Map::new();
            op_data.insert(
                "file_path".to_string(),
                Value::from(path.display().to_string()),
            );
            transaction.add_operation(
                "delete",
                op_data,
                Some(Box::new(move || {
                    std::fs::write(&restore_path, content)?;
                    Ok(())
                })),
            );
        }

        Ok(json!({
            "operation_type": "delete",
            "file_path": path.display().to_string(),
            "deleted": true,
        }))
    }
}

#[async_trait]
impl EffectHandler for FileOperationHandler {
    async fn execute(
        &self,
        operation: &Map<String, Value>,
        transaction: Option<&Transaction>,
    ) -> Result<Value> {
        let operation_type = Self::required_str(operation, "operation_type")?;
        let path = PathBuf::from(Self::required_str(operation, "file_path")?);
        let atomic = operation
            .get("atomic")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        match operation_type {
            "read" => Self::read(&path).await,
            "write" => {
                let data = match operation.get("data") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Self::write(&path, &data, atomic, transaction).await
            }
            "delete" => Self::delete(&path, transaction).await,
            other => Err(Error::Validation(format!("unknown file operation: {other}"))),
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Publishes state-change events on the bus. Not transactional.
pub struct EventEmissionHandler {
    bus: Arc<dyn EventBus>,
}

impl EventEmissionHandler {
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl EffectHandler for EventEmissionHandler {
    async fn execute(
        &self,
        operation: &Map<String, Value>,
        _transaction: Option<&Transaction>,
    ) -> Result<Value> {
        let event_type = operation
            .get("event_type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("event emission requires 'event_type'".to_string()))?
            .to_string();
        let payload = operation.get("payload").cloned().unwrap_or(Value::Null);
        let correlation_id = operation
            .get("correlation_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());

        let delivered = match self
            .bus
            .publish(BusEvent::StateChange(StateChangeEvent {
                event_type: event_type.clone(),
                payload,
                correlation_id,
            }))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(event_type, error = %err, "event emission failed");
                false
            }
        };

        Ok(json!({ "delivered": delivered }))
    }
}

impl std::fmt::Debug for EventEmissionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmissionHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn op(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ticket.json");
        let handler = FileOperationHandler;

        let written = handler
            .execute(
                &op(&[
                    ("operation_type", Value::from("write")),
                    ("file_path", Value::from(path.display().to_string())),
                    ("data", Value::from("{\"id\":1}")),
                ]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(written["bytes_written"], Value::from(8));

        let read = handler
            .execute(
                &op(&[
                    ("operation_type", Value::from("read")),
                    ("file_path", Value::from(path.display().to_string())),
                ]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(read["content"], Value::from("{\"id\":1}"));
    }

    #[tokio::test]
    async fn test_read_missing_file_fails() {
        let dir = tempdir().unwrap();
        let handler = FileOperationHandler;
        let err = handler
            .execute(
                &op(&[
                    ("operation_type", Value::from("read")),
                    (
                        "file_path",
                        Value::from(dir.path().join("absent").display().to_string()),
                    ),
                ]),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_write_rollback_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let handler = FileOperationHandler;
        let txn = Transaction::new("txn-write");
        txn.activate();

        handler
            .execute(
                &op(&[
                    ("operation_type", Value::from("write")),
                    ("file_path", Value::from(path.display().to_string())),
                    ("data", Value::from("payload")),
                    ("atomic", Value::from(true)),
                ]),
                Some(&txn),
            )
            .await
            .unwrap();
        assert!(path.exists());

        assert_eq!(txn.rollback(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_delete_rollback_restores_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keep.txt");
        std::fs::write(&path, "original").unwrap();

        let handler = FileOperationHandler;
        let txn = Transaction::new("txn-delete");
        txn.activate();

        let deleted = handler
            .execute(
                &op(&[
                    ("operation_type", Value::from("delete")),
                    ("file_path", Value::from(path.display().to_string())),
                ]),
                Some(&txn),
            )
            .await
            .unwrap();
        assert_eq!(deleted["deleted"], Value::from(true));
        assert!(!path.exists());

        txn.rollback();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[tokio::test]
    async fn test_delete_missing_reports_false() {
        let dir = tempdir().unwrap();
        let handler = FileOperationHandler;
        let result = handler
            .execute(
                &op(&[
                    ("operation_type", Value::from("delete")),
                    (
                        "file_path",
                        Value::from(dir.path().join("ghost").display().to_string()),
                    ),
                ]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result["deleted"], Value::from(false));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_validation_error() {
        let handler = FileOperationHandler;
        let err = handler
            .execute(
                &op(&[
                    ("operation_type", Value::from("move")),
                    ("file_path", Value::from("/tmp/x")),
                ]),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
