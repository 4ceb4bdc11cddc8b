use thiserror::Error;

/// Errors surfaced by the Check resolution pipeline.
///
/// Variants map directly onto the taxonomy the resolver chain must
/// distinguish: validation failures, model-resolution failures, the
/// recursion/cancellation budgets, and opaque datastore failures.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("invalid tuple key: {0}")]
    InvalidInput(String),

    #[error("authorization model {0} not found")]
    ModelNotFound(String),

    #[error("no authorization model found for store {0}")]
    LatestModelNotFound(String),

    #[error("authorization model too complex (resolution depth exceeded)")]
    ResolutionDepthExceeded,

    #[error("condition evaluation failed: {0}")]
    ConditionEvaluationFailed(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("datastore error: {0}")]
    DatastoreError(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type CheckResult<T> = std::result::Result<T, CheckError>;
