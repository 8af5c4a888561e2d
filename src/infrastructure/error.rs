use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Mail error: {0}")]
    Mail(String),
    #[error("Identity provider error: {0}")]
    Identity(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}
