//! Snapshot pool (C1): the set of known snapshots, per-peer attribution, and
//! permanent rejection bookkeeping. Grounded on `near-network`'s routing-table
//! style of "one lock, several maps keyed by identity" (e.g.
//! `chain/network/src/routing/routing_table_view_v2/mod.rs`), adapted to
//! snapshot identity instead of account/peer identity.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use statesync_primitives::{Format, PeerId, SnapshotDescriptor, SnapshotKey};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

struct Inner {
    snapshots: HashMap<SnapshotKey, SnapshotDescriptor>,
    peers_by_snapshot: HashMap<SnapshotKey, HashSet<PeerId>>,
    rejected_snapshots: HashSet<SnapshotKey>,
    rejected_formats: HashSet<Format>,
    rejected_peers: HashSet<PeerId>,
}

/// Thread-safe set of snapshots discovered from peers, with permanent
/// rejection bookkeeping for the lifetime of one syncer instance.
pub struct SnapshotPool {
    inner: Mutex<Inner>,
}

impl Default for SnapshotPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshots: HashMap::new(),
                peers_by_snapshot: HashMap::new(),
                rejected_snapshots: HashSet::new(),
                rejected_formats: HashSet::new(),
                rejected_peers: HashSet::new(),
            }),
        }
    }

    /// Inserts `snap` if not already present and not rejected along any
    /// dimension, attributing `peer` as a sender. Returns whether this
    /// snapshot was newly discovered by the pool.
    pub fn add(&self, peer: PeerId, snap: SnapshotDescriptor) -> Result<bool, PoolError> {
        if snap.chunk_count == 0 {
            return Err(PoolError::Malformed("chunk_count must be at least 1".to_owned()));
        }
        let key = snap.key();
        let mut inner = self.inner.lock();
        if inner.rejected_peers.contains(&peer) {
            return Ok(false);
        }
        inner.peers_by_snapshot.entry(key.clone()).or_default().insert(peer);
        if inner.snapshots.contains_key(&key) {
            return Ok(false);
        }
        if inner.rejected_snapshots.contains(&key) || inner.rejected_formats.contains(&snap.format) {
            return Ok(false);
        }
        inner.snapshots.insert(key, snap);
        Ok(true)
    }

    /// Deterministic top of the non-rejected ordering (descending
    /// `(height, format)`, ties by lexicographic `hash`), or `None` if empty.
    pub fn best(&self) -> Option<SnapshotDescriptor> {
        let inner = self.inner.lock();
        inner
            .snapshots
            .values()
            .filter(|s| self.is_eligible_locked(&inner, s))
            .max()
            .cloned()
    }

    /// A snapshot is eligible for `Best()` when it hasn't been rejected along
    /// any dimension, *and* at least one peer that advertised it is still
    /// eligible. A `RejectSender` outcome blacklists every advertising peer
    /// without necessarily rejecting the snapshot identity itself (spec S3:
    /// after both `P1` and `P2` are rejected, `Best()` must stop returning
    /// the snapshot they were the sole advertisers of, or `SyncAny` would
    /// offer it again forever with nobody left to fetch chunks from).
    fn is_eligible_locked(&self, inner: &Inner, snap: &SnapshotDescriptor) -> bool {
        !inner.rejected_snapshots.contains(&snap.key())
            && !inner.rejected_formats.contains(&snap.format)
            && inner
                .peers_by_snapshot
                .get(&snap.key())
                .is_some_and(|peers| peers.iter().any(|p| !inner.rejected_peers.contains(p)))
    }

    /// Any one non-rejected peer that advertised `snap`, chosen at random
    /// among the eligible set (the contract only requires *some* eligible
    /// peer, not a specific one).
    pub fn get_peer(&self, snap: &SnapshotDescriptor) -> Option<PeerId> {
        let peers = self.get_peers(snap);
        peers.choose(&mut rand::thread_rng()).cloned()
    }

    /// The full non-rejected set of peers that advertised `snap`.
    pub fn get_peers(&self, snap: &SnapshotDescriptor) -> Vec<PeerId> {
        let inner = self.inner.lock();
        inner
            .peers_by_snapshot
            .get(&snap.key())
            .into_iter()
            .flatten()
            .filter(|p| !inner.rejected_peers.contains(*p))
            .cloned()
            .collect()
    }

    /// Permanently rejects this exact snapshot identity.
    pub fn reject(&self, snap: &SnapshotDescriptor) {
        self.inner.lock().rejected_snapshots.insert(snap.key());
    }

    /// Permanently rejects every snapshot (present or future) with this
    /// format. `Best()` never returns a snapshot with this format again.
    pub fn reject_format(&self, format: Format) {
        self.inner.lock().rejected_formats.insert(format);
    }

    /// Permanently rejects a peer: it stops being returned by
    /// `get_peer`/`get_peers`, and can no longer add new snapshots.
    pub fn reject_peer(&self, peer: &PeerId) {
        self.inner.lock().rejected_peers.insert(peer.clone());
    }

    /// Removes a peer that disconnected; unlike `reject_peer`, this does not
    /// prevent the peer from being re-added later under a fresh connection.
    pub fn remove_peer(&self, peer: &PeerId) {
        let mut inner = self.inner.lock();
        for peers in inner.peers_by_snapshot.values_mut() {
            peers.remove(peer);
        }
    }
}
