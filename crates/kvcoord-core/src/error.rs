use std::time::Duration;

use crate::LeaseId;

pub type Result<O> = std::result::Result<O, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid ttl {0}, must be greater than zero")]
    InvalidTtl(i64),
    #[error("ttl {0} is larger than the maximum lease ttl")]
    TtlTooLarge(i64),
    #[error("requested lease not found: {0}")]
    LeaseNotFound(LeaseId),
    #[error("session lease {0} expired")]
    SessionExpired(LeaseId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to encode value as json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Status(#[from] tonic::Status),
}

impl From<Error> for tonic::Status {
    fn from(error: Error) -> Self {
        match error {
            Error::InvalidTtl(_) | Error::Json(_) => tonic::Status::invalid_argument(error.to_string()),
            Error::TtlTooLarge(_) => tonic::Status::out_of_range(error.to_string()),
            Error::LeaseNotFound(_) | Error::SessionExpired(_) => {
                tonic::Status::not_found(error.to_string())
            }
            Error::Unavailable(_) => tonic::Status::unavailable(error.to_string()),
            Error::Cancelled => tonic::Status::cancelled(error.to_string()),
            Error::Timeout(_) => tonic::Status::deadline_exceeded(error.to_string()),
            Error::Status(status) => status,
        }
    }
}
