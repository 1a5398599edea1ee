//! Change records, emitted by the document store once per committed
//! mutation, after the batch lands. The node wires the pub/sub bus in as the
//! sink; tests use a collecting sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use triggr_common::ProjectId;

use crate::docs::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeOp::Insert => write!(f, "insert"),
            ChangeOp::Update => write!(f, "update"),
            ChangeOp::Delete => write!(f, "delete"),
        }
    }
}

/// One committed mutation. For deletes, `doc` is the document as it stood
/// before removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub project: ProjectId,
    pub op: ChangeOp,
    pub collection: String,
    pub doc_id: String,
    pub doc: Document,
}

/// Receives change records after commit. Implementations must be cheap:
/// the store calls this while still holding the per-document write lock so
/// the publish order matches the commit order.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn publish(&self, change: ChangeRecord);
}

/// Sink that drops everything. For contexts with no subscribers (cascade
/// cleanup, offline tooling).
pub struct NullSink;

#[async_trait]
impl ChangeSink for NullSink {
    async fn publish(&self, _change: ChangeRecord) {}
}

/// Test sink collecting records in arrival order.
pub struct CollectingSink {
    records: tokio::sync::Mutex<Vec<ChangeRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self {
            records: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn drain(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut *self.records.lock().await)
    }
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeSink for CollectingSink {
    async fn publish(&self, change: ChangeRecord) {
        self.records.lock().await.push(change);
    }
}
