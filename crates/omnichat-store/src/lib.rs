pub mod conversations;
pub mod db;
pub mod error;
pub mod messages;
pub mod types;

pub use conversations::ConversationStore;
pub use db::Db;
pub use error::StoreError;
pub use messages::MessageStore;
pub use types::{
    AppendOutcome, Conversation, ConversationFilter, NewMessage, ResolveRequest, Resolved,
    StoredMessage,
};
