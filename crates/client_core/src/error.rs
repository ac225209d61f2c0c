use shared::error::ApiError;
use thiserror::Error;

/// Failure surface of the authoritative backend boundary.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend processed the request and rejected it with a
    /// structured body.
    #[error("backend rejected request: {0}")]
    Rejected(ApiError),
    /// The request never produced a structured response. Retrying is
    /// the caller's decision; nothing in this crate retries.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Typed failure returned by every mutation entry point. Variants map
/// to distinct user-facing treatments, so callers can branch without
/// string matching.
#[derive(Debug, Clone, Error)]
pub enum MutationError {
    /// Input rejected locally or by the backend before any write took
    /// effect.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The local user is not permitted to perform this operation.
    #[error("not permitted: {0}")]
    Forbidden(String),
    /// The optimistic write raced a remote change and lost. Local state
    /// has been rolled back; a refresh will show the settled truth.
    #[error("conflict with remote state: {0}")]
    Conflict(String),
    /// The backend call failed outright. Local state has been rolled
    /// back.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
