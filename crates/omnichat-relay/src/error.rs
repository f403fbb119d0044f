use omnichat_channels::ChannelError;
use omnichat_store::StoreError;

use crate::gate::GateViolation;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("coordination store error: {0}")]
    Kv(#[from] rusqlite::Error),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Failures of the operator manual-send path.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{}", .0.message())]
    Gate(GateViolation),

    #[error("send failed: {0}")]
    Send(#[from] ChannelError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for OperatorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => OperatorError::NotFound(what),
            other => OperatorError::Store(other),
        }
    }
}

impl OperatorError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            OperatorError::InvalidInput(_) => "INVALID_INPUT",
            OperatorError::NotFound(_) => "NOT_FOUND",
            OperatorError::Gate(_) => "FORBIDDEN",
            OperatorError::Send(_) => "SEND_FAILED",
            OperatorError::Store(_) => "INTERNAL_ERROR",
        }
    }
}
