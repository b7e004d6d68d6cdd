//! Data model for the state-sync orchestrator: snapshots, chunks, and peers.
//!
//! Mirrors the split nearcore draws between `near-primitives::sharding` (wire
//! shapes) and `near-client-primitives::types` (sync-status bookkeeping), but
//! collapsed into one module since the state-sync data model here is small.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Monotonically meaningful block-height identifier.
pub type Height = u64;

/// Opaque application-defined snapshot format id.
pub type Format = u32;

/// Zero-based position of a chunk within a snapshot.
pub type ChunkIndex = u32;

/// Stable identifier of a peer on the network.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_owned())
    }
}

/// The identity key used for deduplication and rejection bookkeeping:
/// `(height, format, hash)` per the data model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub height: Height,
    pub format: Format,
    pub hash: Vec<u8>,
}

/// A snapshot advertised by one or more peers.
///
/// `trusted_app_hash` is `None` until the trust provider vouches for
/// `height` (step 2 of `Sync`); it is bound exactly once per attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    pub height: Height,
    pub format: Format,
    pub chunk_count: u32,
    pub hash: Vec<u8>,
    pub metadata: Vec<u8>,
    pub trusted_app_hash: Option<Vec<u8>>,
}

impl SnapshotDescriptor {
    pub fn new(height: Height, format: Format, chunk_count: u32, hash: Vec<u8>, metadata: Vec<u8>) -> Self {
        Self { height, format, chunk_count, hash, metadata, trusted_app_hash: None }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey { height: self.height, format: self.format, hash: self.hash.clone() }
    }

    pub fn metadata_len(&self) -> usize {
        self.metadata.len()
    }
}

impl PartialEq for SnapshotDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SnapshotDescriptor {}

/// Deterministic "best candidate" ordering: descending `(height, format)`,
/// ties broken by lexicographic `hash`. A higher `SnapshotDescriptor` under
/// this order is a *better* sync candidate, so `pool::Best()` picks the
/// maximum.
impl Ord for SnapshotDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.height
            .cmp(&other.height)
            .then_with(|| self.format.cmp(&other.format))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for SnapshotDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One piece of a snapshot's binary payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub height: Height,
    pub format: Format,
    pub index: ChunkIndex,
    pub payload: Vec<u8>,
    pub sender: PeerId,
}

impl Chunk {
    /// Whether this chunk belongs to the snapshot identified by `(height, format)`.
    pub fn matches(&self, height: Height, format: Format) -> bool {
        self.height == height && self.format == format
    }
}
