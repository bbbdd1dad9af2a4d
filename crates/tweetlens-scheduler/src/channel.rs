use async_trait::async_trait;

use crate::{error::ChannelError, types::JobRequest};

/// Outbound half of the transport to the remote compute engine.
///
/// Submission is fire-and-forget: the engine answers later through whatever
/// inbound path the implementation feeds into the
/// [`ResponseCorrelator`](crate::correlator::ResponseCorrelator), at most once
/// per submitted id.
#[async_trait]
pub trait ComputeChannel: Send + Sync {
    /// Stable identifier used in log fields (e.g. `"spark"`).
    fn name(&self) -> &str;

    /// Hand one job to the engine.
    async fn submit(&self, request: &JobRequest) -> Result<(), ChannelError>;
}
