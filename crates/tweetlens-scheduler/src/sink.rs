use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SinkError;

/// One result row, ordered like the job type's `fields`.
pub type Row = Vec<serde_json::Value>;

/// Everything the sink needs to persist one job result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBatch<'a> {
    pub table: &'a str,
    pub fields: &'a [String],
    pub rows: Vec<Row>,
    pub dispatched_at: DateTime<Utc>,
}

/// Durable storage for finished job results.
///
/// Implementations must be `Send + Sync`: the correlator holds one behind an
/// `Arc` and calls it from its own task.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist all rows of one result. Returns the number of rows written.
    async fn save(&self, batch: ResultBatch<'_>) -> Result<usize, SinkError>;
}
