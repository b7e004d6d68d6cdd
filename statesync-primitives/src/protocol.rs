//! Request/response shapes exchanged with the application engine (C3) and
//! the trust provider (C4). The transport that carries them lives elsewhere;
//! these are plain data, serde-derived the same way the rest of the
//! wire-adjacent types in this crate are, even though no in-crate codec
//! touches them directly.

use crate::types::{ChunkIndex, Height, PeerId};
use serde::{Deserialize, Serialize};

/// Response to `OfferSnapshot{snapshot, app_hash}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferSnapshotResult {
    Accept,
    Abort,
    Reject,
    RejectFormat,
    RejectSender,
}

/// Response to `ApplySnapshotChunk{index, payload, sender}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyChunkResult {
    Accept,
    Abort,
    Retry,
    RetrySnapshot,
    RejectSnapshot,
}

/// Full response envelope for `ApplySnapshotChunk`, including the
/// application-directed refetch/reject-sender hints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyChunkResponse {
    pub result: ApplyChunkResult,
    pub refetch_chunks: Vec<ChunkIndex>,
    pub reject_senders: Vec<PeerId>,
}

impl ApplyChunkResponse {
    pub fn accept() -> Self {
        Self { result: ApplyChunkResult::Accept, refetch_chunks: Vec::new(), reject_senders: Vec::new() }
    }
}

/// Response to `Info()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_version: u32,
    pub last_block_app_hash: Vec<u8>,
    pub last_block_height: Height,
}

/// The replicated-state descriptor returned by the trust provider's `State`
/// call. Only the `consensus_app_version` field participates in
/// `verifyApp`'s cross-check; the remainder is opaque to the syncer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedState {
    pub consensus_app_version: u32,
    pub raw: Vec<u8>,
}

/// The block commitment returned by the trust provider's `Commit` call, used
/// by the caller to bootstrap consensus. Opaque to the syncer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCommit {
    pub raw: Vec<u8>,
}
