//! Peer transport boundary. The actual reactor, message codec, and wire
//! format live elsewhere; this module only fixes the shapes carried over the
//! two logical channels and the trait the fetcher pool (C6) sends requests
//! through, mirroring how `near-network::types` defines request structs
//! independent of the actor wiring that moves them.

use async_trait::async_trait;
use statesync_primitives::{ChunkIndex, Format, Height, PeerId};

/// Sent on `SnapshotChannel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotsRequest {}

/// Received on `SnapshotChannel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotsResponse {
    pub height: Height,
    pub format: Format,
    pub chunk_count: u32,
    pub hash: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// Sent on `ChunkChannel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRequest {
    pub height: Height,
    pub format: Format,
    pub index: ChunkIndex,
}

/// Received on `ChunkChannel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkResponse {
    pub height: Height,
    pub format: Format,
    pub index: ChunkIndex,
    pub chunk: Vec<u8>,
}

/// What the chunk-fetcher pool (C6) needs from the transport layer: the
/// ability to ask a specific peer for a specific chunk. Peer discovery for
/// *which* peer to ask is the snapshot pool's job (C1); this trait only
/// covers sending the resulting request.
#[async_trait]
pub trait PeerSender: Send + Sync + 'static {
    async fn send_chunk_request(&self, peer: &PeerId, request: ChunkRequest);

    async fn send_snapshots_request(&self, peer: &PeerId, request: SnapshotsRequest);
}
