use http::Method;
use thiserror::Error;

use crate::pubsub::PublishError;
use crate::storage::StorageError;

/// Failures of a single bulk lookup invocation.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("method {0} not allowed, only POST is accepted")]
    InvalidMethod(Method),
    #[error("bus message carries no data field")]
    MissingPayload,
    #[error("bus message data could not be decoded - {0}")]
    InvalidPayload(String),
    #[error("failed to read PTO records - {0}")]
    StorageFailure(#[from] StorageError),
    #[error("failed to publish dashboard event - {0}")]
    PublishFailure(#[from] PublishError),
    #[error("failed to serialize dashboard event - {0}")]
    SerializationFailure(#[from] serde_json::Error),
}
