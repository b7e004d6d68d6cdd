//! Data types and error taxonomy shared by the state-sync orchestrator crates.
//!
//! Split out of `statesync` the way nearcore splits `near-client-primitives`
//! out of `near-client`: so that error/status types can be depended on
//! without pulling in the full state machine.

mod error;
mod protocol;
mod types;

pub use error::SyncerError;
pub use protocol::{ApplyChunkResponse, ApplyChunkResult, AppInfo, BlockCommit, OfferSnapshotResult, ReplicatedState};
pub use types::{Chunk, ChunkIndex, Format, Height, PeerId, SnapshotDescriptor, SnapshotKey};
