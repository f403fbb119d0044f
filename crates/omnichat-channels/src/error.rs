use thiserror::Error;

/// Errors raised by adapters, the media downloader and outbound clients.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The webhook body could not be interpreted as the provider's shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A send was attempted for a provider with no registered sender.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// The conversation lacks the provider identifiers needed to address it.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The tenant has no credential for the requested provider.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// The provider answered with a non-success status.
    #[error("Provider API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<omnichat_core::OmnichatError> for ChannelError {
    fn from(e: omnichat_core::OmnichatError) -> Self {
        match e {
            omnichat_core::OmnichatError::MissingCredential { name, .. } => {
                ChannelError::MissingCredential(name)
            }
            other => ChannelError::InvalidTarget(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
