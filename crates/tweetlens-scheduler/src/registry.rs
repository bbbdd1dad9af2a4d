use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::{
    error::{Result, SchedulerError, SinkError},
    sink::{ResultBatch, ResultSink, Row},
    types::Job,
};

/// Per-type conversion of an opaque result payload into table rows.
pub trait ResultHandler: Send + Sync {
    fn rows(&self, payload: &serde_json::Value, job: &Job) -> std::result::Result<Vec<Row>, SinkError>;
}

/// Immutable description of one job type.
#[derive(Clone)]
pub struct JobTypeDescriptor {
    name: String,
    target_table: String,
    fields: Vec<String>,
    handler: Arc<dyn ResultHandler>,
}

impl JobTypeDescriptor {
    pub fn new(
        name: &str,
        target_table: &str,
        fields: &[&str],
        handler: impl ResultHandler + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            target_table: target_table.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Project a result payload onto this type's fields.
    pub fn rows(&self, payload: &serde_json::Value, job: &Job) -> std::result::Result<Vec<Row>, SinkError> {
        self.handler.rows(payload, job)
    }

    /// Convert `payload` with this type's handler and write it to `sink`.
    pub async fn save_result(
        &self,
        sink: &dyn ResultSink,
        payload: &serde_json::Value,
        job: &Job,
    ) -> std::result::Result<usize, SinkError> {
        let rows = self.rows(payload, job)?;
        sink.save(ResultBatch {
            table: &self.target_table,
            fields: &self.fields,
            rows,
            dispatched_at: job.created_at,
        })
        .await
    }
}

impl fmt::Debug for JobTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTypeDescriptor")
            .field("name", &self.name)
            .field("target_table", &self.target_table)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Name → descriptor mapping, filled once at start-up.
///
/// Registration takes `&mut self`; once the registry is wrapped in an `Arc`
/// and shared with the scheduler it can only be read.
#[derive(Debug, Default)]
pub struct JobTypeRegistry {
    types: HashMap<String, JobTypeDescriptor>,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: JobTypeDescriptor) -> Result<()> {
        if self.types.contains_key(descriptor.name()) {
            return Err(SchedulerError::DuplicateJobType {
                name: descriptor.name.clone(),
            });
        }
        debug!(job_type = %descriptor.name, table = %descriptor.target_table, "job type registered");
        self.types.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&JobTypeDescriptor> {
        self.types
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownJobType {
                name: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All descriptors, sorted by name for deterministic output.
    pub fn descriptors(&self) -> Vec<&JobTypeDescriptor> {
        let mut all: Vec<_> = self.types.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRows;

    impl ResultHandler for NoRows {
        fn rows(&self, _: &serde_json::Value, _: &Job) -> std::result::Result<Vec<Row>, SinkError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn lookup_finds_registered_type() {
        let mut registry = JobTypeRegistry::new();
        registry
            .register(JobTypeDescriptor::new(
                "TopHashtagJob",
                "toptentags",
                &["name", "count", "timestamp"],
                NoRows,
            ))
            .unwrap();

        let descriptor = registry.lookup("TopHashtagJob").unwrap();
        assert_eq!(descriptor.target_table(), "toptentags");
        assert_eq!(descriptor.fields(), ["name", "count", "timestamp"]);
    }

    #[test]
    fn lookup_unknown_name_fails() {
        let registry = JobTypeRegistry::new();
        match registry.lookup("GhostJob") {
            Err(SchedulerError::UnknownJobType { name }) => assert_eq!(name, "GhostJob"),
            other => panic!("expected UnknownJobType, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = JobTypeRegistry::new();
        registry
            .register(JobTypeDescriptor::new("A", "a", &[], NoRows))
            .unwrap();
        let err = registry
            .register(JobTypeDescriptor::new("A", "other", &[], NoRows))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJobType { .. }));
        assert_eq!(registry.lookup("A").unwrap().target_table(), "a");
    }
}
