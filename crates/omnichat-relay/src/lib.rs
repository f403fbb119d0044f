pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gate;
pub mod kv;
pub mod operator;
pub mod pipeline;

pub use debounce::{BufferedBatch, DebounceRelay, DebounceWindows, DispatchSink};
pub use dispatch::{DispatchCoordinator, DispatchOutcome, DispatchSettings};
pub use error::{OperatorError, RelayError, Result};
pub use events::{EventSink, NullSink, RelayEvent};
pub use gate::GateViolation;
pub use kv::{CoordinationStore, MemoryStore, SqliteStore};
pub use operator::{OperatorService, SendReceipt};
pub use pipeline::{EnrichmentHook, EnrichmentRequest, InboundPipeline, WebhookReport};
