use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    error::Result,
    pending::PendingJobs,
    registry::JobTypeRegistry,
    sink::ResultSink,
    types::JobResponse,
};

/// Matches asynchronous engine responses to their pending job and routes
/// the result to the job type's handler.
pub struct ResponseCorrelator {
    registry: Arc<JobTypeRegistry>,
    pending: Arc<PendingJobs>,
    sink: Arc<dyn ResultSink>,
}

impl ResponseCorrelator {
    pub fn new(
        registry: Arc<JobTypeRegistry>,
        pending: Arc<PendingJobs>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            registry,
            pending,
            sink,
        }
    }

    /// Correlate one response. Returns the number of rows persisted.
    ///
    /// Once the job has been taken from the registry it is completed even if
    /// persisting fails; a sink error is returned but nothing is retried.
    pub async fn on_response(&self, response: JobResponse) -> Result<usize> {
        let job = self.pending.take(&response.job_id)?;
        let descriptor = self.registry.lookup(&job.type_name)?;

        let written = descriptor
            .save_result(self.sink.as_ref(), &response.payload, &job)
            .await?;

        let latency_ms = (chrono::Utc::now() - job.created_at).num_milliseconds();
        info!(
            job_id = %job.id,
            job_type = %job.type_name,
            table = descriptor.target_table(),
            rows = written,
            latency_ms,
            "job completed"
        );
        Ok(written)
    }

    /// Consume responses until the channel closes or `cancel` fires.
    ///
    /// Every per-response failure is logged and the loop keeps going.
    pub async fn run(self, mut responses: mpsc::Receiver<JobResponse>, cancel: CancellationToken) {
        info!("response correlator started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("response correlator shutting down");
                    break;
                }
                next = responses.recv() => {
                    let Some(response) = next else {
                        info!("response channel closed");
                        break;
                    };
                    let job_id = response.job_id.clone();
                    if let Err(e) = self.on_response(response).await {
                        warn!(job_id = %job_id, error = %e, "response dropped");
                    }
                }
            }
        }
    }
}
