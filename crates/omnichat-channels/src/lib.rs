pub mod adapter;
pub mod chatwoot;
pub mod chatwoot_client;
pub mod download;
pub mod error;
pub mod media;
pub mod outbound;
pub mod router;
pub mod types;
pub mod ycloud;
pub mod ycloud_client;

pub use adapter::ChannelAdapter;
pub use chatwoot::ChatwootAdapter;
pub use chatwoot_client::ChatwootClient;
pub use download::{HttpMediaDownloader, MediaDownloader};
pub use error::ChannelError;
pub use outbound::{OutboundRegistry, OutboundSender, OutboundTarget};
pub use router::ChannelRouter;
pub use types::{CanonicalMessage, SenderInfo};
pub use ycloud::YCloudAdapter;
pub use ycloud_client::YCloudClient;
