//! The built-in tweet analytics job types.

use crate::{
    error::{Result, SinkError},
    registry::{JobTypeDescriptor, JobTypeRegistry, ResultHandler},
    sink::Row,
    types::Job,
};

/// Format used for dispatch timestamps written next to result rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where one output column takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// A key of each element in the result array.
    Key(&'static str),
    /// The job's dispatch time.
    DispatchedAt,
}

/// Reads an array of objects under `rows_key` and projects each element
/// onto the job type's columns. Missing keys become `null`.
#[derive(Debug, Clone)]
pub struct RowsHandler {
    rows_key: &'static str,
    columns: Vec<Column>,
}

impl RowsHandler {
    pub fn new(rows_key: &'static str, columns: &[Column]) -> Self {
        Self {
            rows_key,
            columns: columns.to_vec(),
        }
    }
}

impl ResultHandler for RowsHandler {
    fn rows(&self, payload: &serde_json::Value, job: &Job) -> std::result::Result<Vec<Row>, SinkError> {
        let items = payload
            .get(self.rows_key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| SinkError::MalformedPayload {
                job_type: job.type_name.clone(),
                reason: format!("missing array `{}`", self.rows_key),
            })?;

        let dispatched = job.created_at.format(TIMESTAMP_FORMAT).to_string();
        Ok(items
            .iter()
            .map(|item| {
                self.columns
                    .iter()
                    .map(|column| match column {
                        Column::Key(key) => item.get(*key).cloned().unwrap_or(serde_json::Value::Null),
                        Column::DispatchedAt => serde_json::Value::String(dispatched.clone()),
                    })
                    .collect()
            })
            .collect())
    }
}

/// Registry holding every built-in job type.
pub fn builtin_registry() -> Result<JobTypeRegistry> {
    use Column::{DispatchedAt, Key};

    let mut registry = JobTypeRegistry::new();
    registry.register(JobTypeDescriptor::new(
        "TopHashtagJob",
        "toptentags",
        &["name", "count", "timestamp"],
        RowsHandler::new("topHashtags", &[Key("hashtag"), Key("anzahl"), DispatchedAt]),
    ))?;
    registry.register(JobTypeDescriptor::new(
        "OriginTweetsJob",
        "origintweets",
        &["name", "count", "timestamp"],
        RowsHandler::new("origins", &[Key("name"), Key("count"), DispatchedAt]),
    ))?;
    registry.register(JobTypeDescriptor::new(
        "LanguageDistributionJob",
        "languagedistribution",
        &["language", "count", "timestamp"],
        RowsHandler::new("languages", &[Key("language"), Key("count"), DispatchedAt]),
    ))?;
    registry.register(JobTypeDescriptor::new(
        "TweetsAtDaytimeJob",
        "tweetsatdaytime",
        &["timestamp", "count"],
        RowsHandler::new("daytimes", &[Key("timestamp"), Key("count")]),
    ))?;
    registry.register(JobTypeDescriptor::new(
        "WordSearchJob",
        "wordsearch",
        &["name", "timestamp", "count", "written"],
        RowsHandler::new(
            "words",
            &[Key("word"), DispatchedAt, Key("count"), Key("written")],
        ),
    ))?;
    registry.register(JobTypeDescriptor::new(
        "CategoryDistributionJob",
        "categorydistribution",
        &["category", "count", "timestamp"],
        RowsHandler::new("categories", &[Key("category"), Key("count"), DispatchedAt]),
    ))?;
    Ok(registry)
}
