use crate::infrastructure::error::InfraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("start must be before end")]
    InvalidInterval,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("invalid time zone: {0}")]
    InvalidTimeZone(String),
    #[error("this time block overlaps with an existing block")]
    Overlap,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("identity provider unavailable: {0}")]
    IdentityUnavailable(String),
    #[error("delivery failed: {0}")]
    DeliveryFailure(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] InfraError),
}
