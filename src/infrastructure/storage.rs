use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = open_connection(path)?;
    connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    })?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Every repository call opens its own connection; writers wait on each other
/// instead of failing with `SQLITE_BUSY`.
pub fn open_connection(path: &Path) -> Result<Connection, InfraError> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(connection)
}

pub fn to_micros(value: DateTime<Utc>) -> i64 {
    value.timestamp_micros()
}

pub fn from_micros(value: i64, column: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| {
        InfraError::CorruptRecord(format!("{column} holds out-of-range timestamp {value}"))
    })
}
