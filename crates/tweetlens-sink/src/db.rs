use rusqlite::Connection;
use tracing::debug;
use tweetlens_scheduler::{JobTypeDescriptor, JobTypeRegistry, SinkError};

pub(crate) fn db_err(e: rusqlite::Error) -> SinkError {
    SinkError::Database(e.to_string())
}

/// Reject anything but `[A-Za-z_][A-Za-z0-9_]*`; names are spliced into SQL.
pub fn check_identifier(name: &str) -> Result<(), SinkError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidIdentifier(name.to_string()))
    }
}

/// Create the result table (and timestamp index) for every job type.
///
/// Idempotent: safe to run on every start-up.
pub fn init_db(conn: &Connection, registry: &JobTypeRegistry) -> Result<(), SinkError> {
    for descriptor in registry.descriptors() {
        conn.execute_batch(&table_ddl(descriptor)?).map_err(db_err)?;
        debug!(table = descriptor.target_table(), "result table ready");
    }
    Ok(())
}

fn table_ddl(descriptor: &JobTypeDescriptor) -> Result<String, SinkError> {
    let table = descriptor.target_table();
    check_identifier(table)?;
    for field in descriptor.fields() {
        check_identifier(field)?;
    }

    let mut columns = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    columns.extend(descriptor.fields().iter().cloned());
    let mut ddl = format!("CREATE TABLE IF NOT EXISTS {table} ({});", columns.join(", "));
    if descriptor.fields().iter().any(|f| f == "timestamp") {
        ddl.push_str(&format!(
            "\nCREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table} (timestamp);"
        ));
    }
    Ok(ddl)
}
