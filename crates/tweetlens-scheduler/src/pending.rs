use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error};

use crate::{
    error::{Result, SchedulerError},
    types::Job,
};

/// In-memory registry of jobs waiting for their response, keyed by
/// correlation id.
///
/// A single mutex covers every operation, so an `insert` racing a `take`
/// for another id can never lose an update. Critical sections are short
/// and never span an await point.
#[derive(Debug, Default)]
pub struct PendingJobs {
    jobs: Mutex<HashMap<String, Job>>,
}

impl PendingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A panic in another holder must not take the registry down with it:
    /// every operation leaves the map consistent, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job under its id.
    ///
    /// Fails with `DuplicateCorrelationId` if the id is already pending; the
    /// existing entry is left untouched.
    pub fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            error!(job_id = %job.id, job_type = %job.type_name, "duplicate correlation id");
            return Err(SchedulerError::DuplicateCorrelationId { id: job.id });
        }
        debug!(job_id = %job.id, job_type = %job.type_name, "job pending");
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Atomically look up and remove the job with `id`.
    pub fn take(&self, id: &str) -> Result<Job> {
        self.lock()
            .remove(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return every job created before `now - max_age`.
    pub fn sweep_expired(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<Job> {
        let cutoff = now - max_age;
        let mut jobs = self.lock();
        let expired: Vec<String> = jobs
            .values()
            .filter(|job| job.created_at < cutoff)
            .map(|job| job.id.clone())
            .collect();
        expired.iter().filter_map(|id| jobs.remove(id)).collect()
    }
}
