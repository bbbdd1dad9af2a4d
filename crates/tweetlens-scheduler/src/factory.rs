use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{error::Result, registry::JobTypeRegistry, types::Job};

/// Builds [`Job`] values for registered job types.
#[derive(Debug, Clone)]
pub struct JobFactory {
    registry: Arc<JobTypeRegistry>,
}

impl JobFactory {
    pub fn new(registry: Arc<JobTypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<JobTypeRegistry> {
        &self.registry
    }

    /// Create a job with a fresh random 128-bit correlation id.
    ///
    /// Fails with `UnknownJobType` when `type_name` is not registered; no
    /// job is produced in that case.
    pub fn create(
        &self,
        type_name: &str,
        params: Vec<serde_json::Value>,
        time_offset: i64,
    ) -> Result<Job> {
        let descriptor = self.registry.lookup(type_name)?;
        Ok(Job {
            id: Uuid::new_v4().to_string(),
            type_name: descriptor.name().to_string(),
            params,
            time_offset,
            created_at: Utc::now(),
        })
    }
}
