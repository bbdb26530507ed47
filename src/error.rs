use thiserror::Error;

/// Crate-wide error type, one variant per kind in the error taxonomy.
///
/// Variants map to the policy table in the spec: some are fatal at
/// startup, some are surfaced to callers, some only ever get logged.
/// Callers that need to distinguish "not found" from "everything else"
/// should match on `AppError::NotFound` rather than stringify the error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    #[error("store error: {0}")]
    StoreTransient(#[source] sqlx::Error),

    #[error("rclone daemon unreachable: {0}")]
    DaemonUnreachable(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("{reason}")]
    GatekeeperDenied { reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::StoreTransient(other),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            AppError::DaemonUnreachable(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::DaemonUnreachable(_) | AppError::TransferFailed(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

pub type AppResult<T> = Result<T, AppError>;
