use thiserror::Error;

#[derive(Debug, Error)]
pub enum OmnichatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(i64),

    #[error("Missing credential {name} for tenant {tenant}")]
    MissingCredential { tenant: i64, name: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OmnichatError {
    /// Short error code string for HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            OmnichatError::Config(_) => "CONFIG_ERROR",
            OmnichatError::AuthFailed(_) => "AUTH_FAILED",
            OmnichatError::TenantNotFound(_) => "TENANT_NOT_FOUND",
            OmnichatError::MissingCredential { .. } => "MISSING_CREDENTIAL",
            OmnichatError::Serialization(_) => "SERIALIZATION_ERROR",
            OmnichatError::Io(_) => "IO_ERROR",
            OmnichatError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OmnichatError>;
