//! Syncer state machine (C5) and its outer `SyncAny` retry loop: the
//! per-snapshot restore flow, its reject/retry classification, and its
//! interaction with the chunk-fetcher pool (C6). Grounded on the overall
//! shape of `StateSync::run` in `chain/client/src/sync/state/mod.rs`, a
//! driver that claims an in-progress slot, delegates to per-attempt workers,
//! and classifies the outcome, generalized here from "one entry per tracked
//! shard" to "one in-progress snapshot for the whole syncer".

use crate::app_conn::AppConn;
use crate::fetcher::{apply_chunks, join_fetchers, spawn_fetchers};
use crate::network::{PeerSender, SnapshotsRequest};
use crate::pool::SnapshotPool;
use crate::queue::ChunkQueue;
use crate::trust::{with_trust_deadline, TrustProvider};
use parking_lot::RwLock;
use statesync_config::SyncerConfig;
use statesync_primitives::{BlockCommit, Chunk, PeerId, ReplicatedState, SnapshotDescriptor, SyncerError};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Guard against accidentally-too-short discovery windows: callers that pass
/// a tiny nonzero value almost certainly meant "give the pool a moment to
/// fill", not "barely wait at all", so round up to a more useful window.
pub const MINIMUM_DISCOVERY_TIME: Duration = Duration::from_secs(5);

fn normalize_discovery_time(discovery_time: Duration) -> Duration {
    if discovery_time > Duration::ZERO && discovery_time < MINIMUM_DISCOVERY_TIME {
        MINIMUM_DISCOVERY_TIME * 5
    } else {
        discovery_time
    }
}

/// Runs `fut` under the trust-provider deadline and folds every non-`NoWitnesses`
/// error into `RejectSnapshot`. Both the initial attestation and the later
/// bootstrap-artifact fetch share this policy: a missing witness is
/// unrecoverable and must propagate, anything else just means this snapshot
/// can't be trusted and the syncer should move on.
async fn attest<T>(fut: impl Future<Output = Result<T, SyncerError>>) -> Result<T, SyncerError> {
    match with_trust_deadline(fut).await {
        Ok(value) => Ok(value),
        Err(SyncerError::NoWitnesses) => Err(SyncerError::NoWitnesses),
        Err(other) => Err(SyncerError::RejectSnapshot(format!("trust provider error: {other}"))),
    }
}

/// The per-snapshot restoration orchestrator. One instance coordinates
/// exactly one in-progress sync at a time.
pub struct Syncer {
    pool: Arc<SnapshotPool>,
    config: SyncerConfig,
    app: Arc<dyn AppConn>,
    /// Accepted for interface parity with the real ABCI-style split between
    /// a mutating connection and a read-only query connection; no operation
    /// here calls it, so it is kept but unused within this crate (see
    /// DESIGN.md).
    #[allow(dead_code)]
    query_conn: Arc<dyn AppConn>,
    trust: Arc<dyn TrustProvider>,
    peer_sender: Arc<dyn PeerSender>,
    temp_dir: PathBuf,
    /// The "current chunk queue" pointer: `None` means no sync is active.
    /// `AddChunk` takes a read lock; `Sync`/`SyncAny` take the write lock
    /// only at claim/clear time, never for the duration of a restore, so
    /// inbound chunks keep flowing while a restore runs.
    current_queue: RwLock<Option<Arc<ChunkQueue>>>,
}

impl Syncer {
    pub fn new(
        config: SyncerConfig,
        app: Arc<dyn AppConn>,
        query_conn: Arc<dyn AppConn>,
        trust: Arc<dyn TrustProvider>,
        peer_sender: Arc<dyn PeerSender>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool: Arc::new(SnapshotPool::new()),
            config,
            app,
            query_conn,
            trust,
            peer_sender,
            temp_dir: temp_dir.into(),
            current_queue: RwLock::new(None),
        }
    }

    pub fn pool(&self) -> &SnapshotPool {
        &self.pool
    }

    /// `AddSnapshot`: forwards a peer-advertised snapshot into the pool.
    pub fn add_snapshot(&self, peer: PeerId, snap: SnapshotDescriptor) -> Result<bool, SyncerError> {
        self.pool.add(peer, snap).map_err(|err| SyncerError::Other(anyhow::anyhow!(err)))
    }

    /// `AddChunk`: routes an inbound chunk to the in-progress queue, if any.
    /// Fails cleanly (does not panic) when no sync is currently active.
    pub fn add_chunk(&self, chunk: Chunk) -> Result<bool, SyncerError> {
        let guard = self.current_queue.read();
        let queue = guard
            .as_ref()
            .ok_or_else(|| SyncerError::Other(anyhow::anyhow!("no state sync in progress")))?;
        queue.add(chunk).map_err(|err| SyncerError::Other(anyhow::anyhow!(err)))
    }

    /// `AddPeer`: a newly available peer is asked for its known snapshots.
    pub async fn add_peer(&self, peer: PeerId) {
        self.peer_sender.send_snapshots_request(&peer, SnapshotsRequest {}).await;
    }

    /// `RemovePeer`: forgets a disconnected peer's snapshot attributions.
    /// Unlike `reject_peer`, this is not permanent; the peer may reconnect
    /// and be re-attributed later.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.pool.remove_peer(peer);
    }

    fn claim_in_progress(&self, queue: &Arc<ChunkQueue>) -> Result<(), SyncerError> {
        let mut guard = self.current_queue.write();
        if guard.is_some() {
            return Err(SyncerError::AlreadyInProgress);
        }
        *guard = Some(queue.clone());
        Ok(())
    }

    fn clear_in_progress(&self) {
        *self.current_queue.write() = None;
    }

    /// `Sync(snap, queue)`: one restoration attempt against a specific
    /// snapshot and queue. Manages its own in-progress claim for the
    /// duration of this single call, releasing it symmetrically on every
    /// exit path.
    pub async fn sync(
        &self,
        mut snap: SnapshotDescriptor,
        queue: Arc<ChunkQueue>,
    ) -> Result<(ReplicatedState, BlockCommit), SyncerError> {
        if queue.chunk_count != snap.chunk_count {
            return Err(SyncerError::Other(anyhow::anyhow!(
                "queue chunk_count ({}) must match snapshot chunk_count ({})",
                queue.chunk_count,
                snap.chunk_count
            )));
        }
        self.claim_in_progress(&queue)?;
        let _clear_on_exit = ClearInProgressOnDrop(self);
        self.sync_locked(&mut snap, &queue).await
    }

    /// The real step 2–8 body of `Sync`, assuming the in-progress pointer is
    /// already claimed by the caller (either `sync()` above, for a
    /// standalone attempt, or `sync_any()` below, across a `RetrySnapshot`
    /// loop-back on the same queue).
    async fn sync_locked(
        &self,
        snap: &mut SnapshotDescriptor,
        queue: &Arc<ChunkQueue>,
    ) -> Result<(ReplicatedState, BlockCommit), SyncerError> {
        crate::metrics::SYNCER_STAGE.set(1);

        // Step 2: attest the snapshot.
        let app_hash = attest(self.trust.app_hash(snap.height)).await?;
        snap.trusted_app_hash = Some(app_hash.clone());

        // Step 3: offer.
        crate::metrics::SYNCER_STAGE.set(2);
        match self.app.offer_snapshot(snap.height, snap.format, &app_hash).await {
            statesync_primitives::OfferSnapshotResult::Accept => {}
            statesync_primitives::OfferSnapshotResult::Abort => return Err(SyncerError::Abort),
            statesync_primitives::OfferSnapshotResult::Reject => {
                return Err(SyncerError::RejectSnapshot("application rejected the snapshot offer".to_owned()));
            }
            statesync_primitives::OfferSnapshotResult::RejectFormat => {
                return Err(SyncerError::RejectFormat(snap.format));
            }
            statesync_primitives::OfferSnapshotResult::RejectSender => return Err(SyncerError::RejectSender),
        }

        // Step 4: spawn chunk-fetcher workers under one cancellation scope.
        crate::metrics::SYNCER_STAGE.set(3);
        let cancel = CancellationToken::new();
        let handles =
            spawn_fetchers(&self.config, queue.clone(), self.pool.clone(), self.peer_sender.clone(), snap.clone(), cancel.clone());

        // Step 5 (concurrent with step 6): pre-build the bootstrap artifacts
        // while chunks are still being fetched and applied, so the caller
        // never restores and then discovers a trust failure afterwards.
        let trust_fut = async {
            let state = attest(self.trust.state(snap.height)).await?;
            let commit = attest(self.trust.commit(snap.height)).await?;
            Ok::<(ReplicatedState, BlockCommit), SyncerError>((state, commit))
        };
        let apply_fut =
            apply_chunks(queue, &self.pool, self.app.as_ref(), snap.height, snap.format, crate::fetcher::CHUNK_TIMEOUT);

        let (apply_result, trust_result) = tokio::join!(apply_fut, trust_fut);

        // The fetcher tasks must be joined (or cancelled and reaped) before
        // `Sync` returns, so a second `Sync` call can never race with
        // stragglers of the first.
        cancel.cancel();
        join_fetchers(handles).await;

        apply_result?;
        let (state, commit) = trust_result?;

        // Step 7: verify.
        crate::metrics::SYNCER_STAGE.set(4);
        verify_app(self.app.as_ref(), snap, state.consensus_app_version).await?;

        crate::metrics::SYNCER_STAGE.set(0);
        Ok((state, commit))
    }

    /// `SyncAny(discoveryTime, retryHook)`: tries snapshots one by one until
    /// one succeeds or a non-recoverable condition arises. Owns the
    /// in-progress claim across any `RetrySnapshot` loop-back on the same
    /// queue, so inbound chunks for that snapshot are never dropped between
    /// attempts.
    pub async fn sync_any(
        &self,
        discovery_time: Duration,
        mut retry_hook: impl FnMut(),
    ) -> Result<(ReplicatedState, BlockCommit), SyncerError> {
        let discovery_time = normalize_discovery_time(discovery_time);
        if discovery_time > Duration::ZERO {
            tokio::time::sleep(discovery_time).await;
        }

        loop {
            let mut snap = loop {
                if let Some(candidate) = self.pool.best() {
                    break candidate;
                }
                if discovery_time.is_zero() {
                    return Err(SyncerError::NoSnapshots);
                }
                retry_hook();
                tokio::time::sleep(discovery_time).await;
            };

            let queue = Arc::new(ChunkQueue::new(snap.height, snap.format, snap.chunk_count, &self.temp_dir));
            self.claim_in_progress(&queue)?;

            let outcome = loop {
                match self.sync_locked(&mut snap, &queue).await {
                    Err(SyncerError::RetrySnapshot) => {
                        debug!(height = snap.height, format = snap.format, "retrying snapshot, keeping delivered chunks");
                        queue.retry_all();
                        continue;
                    }
                    other => break other,
                }
            };

            self.clear_in_progress();
            queue.close();

            match outcome {
                Ok(result) => return Ok(result),
                Err(SyncerError::Abort) => return Err(SyncerError::Abort),
                Err(SyncerError::Timeout) => {
                    warn!(height = snap.height, "chunk delivery timed out, rejecting snapshot");
                    crate::metrics::SNAPSHOTS_REJECTED.inc();
                    self.pool.reject(&snap);
                }
                Err(SyncerError::RejectSnapshot(reason)) => {
                    info!(height = snap.height, reason, "snapshot rejected");
                    crate::metrics::SNAPSHOTS_REJECTED.inc();
                    self.pool.reject(&snap);
                }
                Err(SyncerError::RejectFormat(format)) => {
                    info!(format, "snapshot format rejected");
                    self.pool.reject_format(format);
                }
                Err(SyncerError::RejectSender) => {
                    for peer in self.pool.get_peers(&snap) {
                        self.pool.reject_peer(&peer);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

struct ClearInProgressOnDrop<'a>(&'a Syncer);

impl Drop for ClearInProgressOnDrop<'_> {
    fn drop(&mut self) {
        self.0.clear_in_progress();
    }
}

/// `verifyApp`: fails if the restored application's reported version, hash,
/// or height do not match the independently attested reference.
async fn verify_app(app: &dyn AppConn, snap: &SnapshotDescriptor, expected_app_version: u32) -> Result<(), SyncerError> {
    let info = app.info().await;
    if info.app_version != expected_app_version {
        return Err(SyncerError::VerifyFailed(format!(
            "app version {} does not match expected {}, the remote app did not implement \
             state-sync or Info correctly",
            info.app_version, expected_app_version
        )));
    }
    let trusted = snap.trusted_app_hash.as_deref().unwrap_or_default();
    if info.last_block_app_hash != trusted {
        return Err(SyncerError::VerifyFailed("last_block_app_hash does not match the trusted app hash".to_owned()));
    }
    if info.last_block_height != snap.height {
        return Err(SyncerError::VerifyFailed(format!(
            "last_block_height {} does not match snapshot height {}",
            info.last_block_height, snap.height
        )));
    }
    Ok(())
}
