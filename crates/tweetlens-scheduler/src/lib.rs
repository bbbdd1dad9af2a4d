//! `tweetlens-scheduler` — periodic job dispatch and response correlation.
//!
//! # Overview
//!
//! Each [`Trigger`] runs as its own Tokio task inside the
//! [`engine::IntervalScheduler`]. On every tick the trigger asks the
//! [`factory::JobFactory`] for a fresh [`Job`], records it in the
//! [`pending::PendingJobs`] registry and submits it to the
//! [`channel::ComputeChannel`]. Results come back asynchronously and are
//! matched to their job by the [`correlator::ResponseCorrelator`], which
//! hands them to the job type's result handler and the [`sink::ResultSink`].
//!
//! # Job lifecycle
//!
//! | State     | Meaning                                                   |
//! |-----------|-----------------------------------------------------------|
//! | Pending   | Submitted, waiting in the registry for its response       |
//! | Completed | Response matched and removed (sink outcome irrelevant)    |
//! | Orphaned  | No response ever arrived; only removed by the opt-in sweep |

pub mod channel;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod factory;
pub mod jobs;
pub mod pending;
pub mod registry;
pub mod schedule;
pub mod sink;
pub mod types;

pub use channel::ComputeChannel;
pub use correlator::ResponseCorrelator;
pub use engine::IntervalScheduler;
pub use error::{ChannelError, Result, SchedulerError, SinkError};
pub use factory::JobFactory;
pub use pending::PendingJobs;
pub use registry::{JobTypeDescriptor, JobTypeRegistry};
pub use sink::{ResultBatch, ResultSink, Row};
pub use types::{Job, JobRequest, JobResponse, Repeat, Trigger};
