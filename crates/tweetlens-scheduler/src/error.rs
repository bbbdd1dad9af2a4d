use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// Everything except [`SchedulerError::EmptyRegistry`] and
/// [`SchedulerError::AlreadyStarted`] is scoped to a single tick or a single
/// response and never stops other triggers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job type with this name is registered.
    #[error("Unknown job type: {name}")]
    UnknownJobType { name: String },

    /// No pending job carries this correlation id.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A job with this correlation id is already pending.
    #[error("Duplicate correlation id: {id}")]
    DuplicateCorrelationId { id: String },

    /// A job type with this name was registered twice.
    #[error("Duplicate job type: {name}")]
    DuplicateJobType { name: String },

    #[error("Job type registry is empty")]
    EmptyRegistry,

    #[error("Scheduler already started")]
    AlreadyStarted,

    /// The trigger definition is invalid (zero period, bad repeat count).
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Result sink failure: {0}")]
    Sink(#[from] SinkError),

    #[error("Compute channel failure: {0}")]
    Channel(#[from] ChannelError),
}

/// Failures while turning a result into rows or persisting them.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(String),

    /// The result payload does not have the shape the job type expects.
    #[error("Malformed payload for {job_type}: {reason}")]
    MalformedPayload { job_type: String, reason: String },

    /// A table or column name is not a plain SQL identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Failures while talking to the compute engine.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
