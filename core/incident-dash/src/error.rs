use incident_core::{ApiError, SyncError};

#[derive(Debug, thiserror::Error)]
pub enum DashError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{0}")]
    Usage(String),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DashError>;
