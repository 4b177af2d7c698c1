use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("malformed saved state: {0}")]
    MalformedSavedState(String),
    #[error("income dependencies must sum to 1 (got {0})")]
    InvalidDependency(f64),
    #[error("invalid management action: {0}")]
    InvalidAction(String),
    #[error("rotation period must be at least one year (got {0})")]
    InvalidRotationPeriod(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;
