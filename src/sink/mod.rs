//! 错误日志：记录最终失败的请求（仅追加）。
//!
//! # Error Sink Module
//!
//! Append-only store for work items that failed terminally. One record per
//! failed item, never mutated or removed.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ErrorLogEntry`] | `{payload, errors, metadata}` record |
//! | [`ErrorSink`] | Trait for error log destinations |
//! | [`NoopErrorSink`] | Discards every record |
//! | [`InMemoryErrorSink`] | In-memory sink for testing |
//! | [`JsonlErrorSink`] | One JSON object per line, appended to a file |

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub payload: Value,
    pub errors: Vec<String>,
    pub metadata: Value,
}

impl ErrorLogEntry {
    pub fn new(payload: Value, errors: Vec<String>, metadata: Option<Value>) -> Self {
        Self {
            payload,
            errors,
            metadata: metadata.unwrap_or(Value::Null),
        }
    }
}

#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn append(&self, entry: ErrorLogEntry) -> Result<()>;
}

/// Sink that drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorSink;

#[async_trait]
impl ErrorSink for NoopErrorSink {
    async fn append(&self, _entry: ErrorLogEntry) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn ErrorSink> {
    Arc::new(NoopErrorSink)
}

/// In-memory sink for testing.
#[derive(Debug, Default)]
pub struct InMemoryErrorSink {
    entries: RwLock<Vec<ErrorLogEntry>>,
}
impl InMemoryErrorSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
#[async_trait]
impl ErrorSink for InMemoryErrorSink {
    async fn append(&self, entry: ErrorLogEntry) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}

/// Appends each record as one JSON line.
///
/// Writes are serialized so concurrent workers never interleave lines.
#[derive(Debug)]
pub struct JsonlErrorSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlErrorSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ErrorSink for JsonlErrorSink {
    async fn append(&self, entry: ErrorLogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
