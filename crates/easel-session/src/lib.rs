//! Session orchestration: media-group batching, per-user generation gates,
//! carry-over photo buffers and transient-message bookkeeping.

pub mod aggregator;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod pending;
pub mod sessions;
pub mod transport;

pub use aggregator::{GroupBatch, GroupKey, MediaGroupAggregator};
pub use error::SessionError;
pub use orchestrator::{ModelSelection, SessionOrchestrator};
pub use sessions::SessionTable;
pub use transport::{ChatTransport, TransportError};
