use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{types::Value as SqlValue, Connection};
use tracing::{debug, info};
use tweetlens_scheduler::{JobTypeRegistry, ResultBatch, ResultSink, SinkError};

use crate::db::{check_identifier, db_err, init_db};

/// [`ResultSink`] writing each result into its job type's SQLite table.
///
/// Thread-safe: the connection sits behind a Mutex and every `save` runs
/// in one transaction.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    /// Wrap `conn` and create the tables for every registered job type.
    pub fn new(conn: Connection, registry: &JobTypeRegistry) -> Result<Self, SinkError> {
        init_db(&conn, registry)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str, registry: &JobTypeRegistry) -> Result<Self, SinkError> {
        info!(path, "opening result database");
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(db_err)?;
        Self::new(conn, registry)
    }

    /// Number of rows stored in `table`.
    pub fn count(&self, table: &str) -> Result<i64, SinkError> {
        check_identifier(table)?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(db_err)
    }
}

/// JSON → SQLite value. Arrays and objects are kept as JSON text.
fn to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[async_trait]
impl ResultSink for SqliteSink {
    async fn save(&self, batch: ResultBatch<'_>) -> Result<usize, SinkError> {
        check_identifier(batch.table)?;
        for field in batch.fields {
            check_identifier(field)?;
        }
        if let Some(row) = batch.rows.iter().find(|r| r.len() != batch.fields.len()) {
            return Err(SinkError::MalformedPayload {
                job_type: batch.table.to_string(),
                reason: format!("row has {} values for {} fields", row.len(), batch.fields.len()),
            });
        }

        let placeholders: Vec<String> = (1..=batch.fields.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            batch.table,
            batch.fields.join(", "),
            placeholders.join(", ")
        );

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx.prepare_cached(&sql).map_err(db_err)?;
            for row in &batch.rows {
                stmt.execute(rusqlite::params_from_iter(row.iter().map(to_sql)))
                    .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;

        debug!(
            table = batch.table,
            rows = batch.rows.len(),
            dispatched_at = %batch.dispatched_at,
            "result rows written"
        );
        Ok(batch.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use tweetlens_scheduler::jobs::builtin_registry;

    use super::*;

    fn sink() -> SqliteSink {
        SqliteSink::new(
            Connection::open_in_memory().unwrap(),
            &builtin_registry().unwrap(),
        )
        .unwrap()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn writes_all_rows() {
        let sink = sink();
        let fields = fields(&["name", "count", "timestamp"]);
        let written = sink
            .save(ResultBatch {
                table: "toptentags",
                fields: &fields,
                rows: vec![
                    vec![json!("harald"), json!(200), json!("2026-03-01 14:05:00")],
                    vec![json!("Neuschwanstein"), json!(130), json!("2026-03-01 14:05:00")],
                ],
                dispatched_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(sink.count("toptentags").unwrap(), 2);

        let conn = sink.conn.lock().unwrap();
        let top: (String, i64) = conn
            .query_row(
                "SELECT name, count FROM toptentags ORDER BY count DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(top, ("harald".to_string(), 200));
    }

    #[tokio::test]
    async fn ragged_row_writes_nothing() {
        let sink = sink();
        let fields = fields(&["language", "count", "timestamp"]);
        let err = sink
            .save(ResultBatch {
                table: "languagedistribution",
                fields: &fields,
                rows: vec![
                    vec![json!("de"), json!(3), json!("2026-03-01 14:05:00")],
                    vec![json!("en")],
                ],
                dispatched_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::MalformedPayload { .. }));
        assert_eq!(sink.count("languagedistribution").unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_table_is_a_database_error() {
        let sink = sink();
        let fields = fields(&["name"]);
        let err = sink
            .save(ResultBatch {
                table: "nosuchtable",
                fields: &fields,
                rows: vec![vec![json!("x")]],
                dispatched_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Database(_)));
    }

    #[test]
    fn json_values_map_to_sqlite() {
        assert_eq!(to_sql(&json!(null)), SqlValue::Null);
        assert_eq!(to_sql(&json!(true)), SqlValue::Integer(1));
        assert_eq!(to_sql(&json!(7)), SqlValue::Integer(7));
        assert_eq!(to_sql(&json!(0.5)), SqlValue::Real(0.5));
        assert_eq!(to_sql(&json!("de")), SqlValue::Text("de".to_string()));
        assert_eq!(to_sql(&json!([1, 2])), SqlValue::Text("[1,2]".to_string()));
    }
}
