use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tweetlens_core::config::TriggerConfig;

use crate::error::{Result, SchedulerError};

/// One dispatched, in-flight computation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Correlation id (UUID v4 string).
    pub id: String,
    /// Name of the registered job type.
    pub type_name: String,
    /// Opaque parameters, forwarded unchanged to the compute engine.
    pub params: Vec<serde_json::Value>,
    /// Windows of historical lookback; 0 is the current window.
    pub time_offset: i64,
    /// Dispatch instant.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// The outbound form of this job, as handed to the compute channel.
    pub fn request(&self) -> JobRequest {
        JobRequest {
            id: self.id.clone(),
            name: self.type_name.clone(),
            params: self.params.clone(),
            time_offset: self.time_offset,
        }
    }
}

/// Payload submitted to the compute engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "jobID")]
    pub id: String,
    pub name: String,
    pub params: Vec<serde_json::Value>,
    #[serde(rename = "timeOffset")]
    pub time_offset: i64,
}

/// Asynchronous result delivered by the compute engine.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResponse {
    pub job_id: String,
    pub payload: serde_json::Value,
}

/// How many times a trigger fires before it stops on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Forever,
    Times(u32),
}

impl Repeat {
    /// Parse the configuration form: `-1` is forever, `N > 0` is N fires.
    pub fn from_count(count: i64) -> Result<Self> {
        match count {
            -1 => Ok(Repeat::Forever),
            n if n > 0 => u32::try_from(n)
                .map(Repeat::Times)
                .map_err(|_| SchedulerError::InvalidSchedule(format!("repeat count {n} too large"))),
            n => Err(SchedulerError::InvalidSchedule(format!(
                "repeat count must be -1 or positive, got {n}"
            ))),
        }
    }

    pub fn is_exhausted(&self, fired: u32) -> bool {
        match self {
            Repeat::Forever => false,
            Repeat::Times(n) => fired >= *n,
        }
    }
}

/// One independently scheduled recurring source of jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub type_name: String,
    pub params: Vec<serde_json::Value>,
    pub period: Duration,
    pub time_offset: i64,
    pub repeat: Repeat,
}

impl Trigger {
    pub fn new(
        type_name: &str,
        params: Vec<serde_json::Value>,
        period_ms: u64,
        time_offset: i64,
        repeat: Repeat,
    ) -> Result<Self> {
        if period_ms == 0 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "{type_name}: period must be positive"
            )));
        }
        Ok(Self {
            type_name: type_name.to_string(),
            params,
            period: Duration::from_millis(period_ms),
            time_offset,
            repeat,
        })
    }

    /// Infinite trigger with no lookback.
    pub fn every(type_name: &str, params: Vec<serde_json::Value>, period_ms: u64) -> Result<Self> {
        Self::new(type_name, params, period_ms, 0, Repeat::Forever)
    }

    pub fn from_config(config: &TriggerConfig) -> Result<Self> {
        Self::new(
            &config.job,
            config.params.clone(),
            config.period_ms,
            config.time_offset,
            Repeat::from_count(config.repeat)?,
        )
    }
}
