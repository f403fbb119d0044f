pub mod config;
pub mod credentials;
pub mod error;
pub mod time;
pub mod types;

pub use error::{OmnichatError, Result};
pub use types::{ConversationId, MediaItem, MediaType, Role, TenantId};
