//! Chunk-fetcher pool (C6) and `applyChunks`. Grounded on the resend/timeout
//! loop `near-chunks`'s `ShardsManagerActor` runs for in-flight chunk-part
//! requests (`CHUNK_REQUEST_RETRY`/`CHUNK_REQUEST_SWITCH_TO_OTHERS` in
//! `chain/chunks/src/shards_manager_actor.rs`), adapted from a periodic
//! actor tick to a `tokio` task per worker with its own retry ticker.

use crate::app_conn::AppConn;
use crate::pool::SnapshotPool;
use crate::queue::{ChunkQueue, QueueError};
use statesync_config::SyncerConfig;
use statesync_primitives::{ApplyChunkResult, Format, Height, SnapshotDescriptor, SyncerError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::network::{ChunkRequest, PeerSender};

/// How long `Allocate()` returning `Done` is treated as "nothing to do right
/// now" before a fetcher worker checks again: restoration may still request
/// refetches while a previous pass is draining, so `Done` isn't necessarily
/// final.
const ALLOCATE_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// The per-`Next()` chunk timeout the syncer enforces explicitly:
/// `applyChunks` wraps `queue.next()` with this deadline rather than relying
/// on it being implicit somewhere in the fetcher pool.
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(120);

/// Spawns `cfg.chunk_fetchers` worker tasks sharing `queue`, returning their
/// join handles. Workers exit when the queue is closed or `cancel` fires;
/// the caller must join (or abort) every handle before `Sync` returns so a
/// second `Sync` can never race with stragglers of the first.
pub fn spawn_fetchers(
    cfg: &SyncerConfig,
    queue: Arc<ChunkQueue>,
    pool: Arc<SnapshotPool>,
    peer_sender: Arc<dyn PeerSender>,
    snap: SnapshotDescriptor,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..cfg.chunk_fetchers)
        .map(|worker_id| {
            let queue = queue.clone();
            let pool = pool.clone();
            let peer_sender = peer_sender.clone();
            let snap = snap.clone();
            let cancel = cancel.clone();
            let request_timeout = cfg.chunk_request_timeout;
            tokio::spawn(async move {
                run_fetcher_worker(worker_id, queue, pool, peer_sender, snap, cancel, request_timeout).await;
            })
        })
        .collect()
}

async fn run_fetcher_worker(
    worker_id: u8,
    queue: Arc<ChunkQueue>,
    pool: Arc<SnapshotPool>,
    peer_sender: Arc<dyn PeerSender>,
    snap: SnapshotDescriptor,
    cancel: CancellationToken,
    request_timeout: Duration,
) {
    let mut next = true;
    let mut current_index = None;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        if next {
            match queue.allocate() {
                Ok(index) => {
                    current_index = Some(index);
                }
                Err(QueueError::Done) | Err(QueueError::Mismatch) | Err(QueueError::IndexOutOfRange(_)) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(ALLOCATE_RETRY_BACKOFF) => continue,
                    }
                }
            }
        }
        let Some(index) = current_index else { continue };

        let Some(peer) = pool.get_peer(&snap) else {
            debug!(worker_id, "no peer available to request chunk {index} from, exiting");
            return;
        };
        peer_sender
            .send_chunk_request(&peer, ChunkRequest { height: snap.height, format: snap.format, index })
            .await;

        tokio::select! {
            _ = queue.wait_for(index) => {
                next = true;
            }
            _ = tokio::time::sleep(request_timeout) => {
                warn!(worker_id, index, %peer, "chunk request timed out, retrying with another peer");
                next = false;
            }
            _ = cancel.cancelled() => {
                return;
            }
        }
    }
}

/// Drains `queue` in ascending index order, submitting each chunk to the
/// application and dispatching its response sequentially. Chunks must be
/// applied strictly in order and the application's response (`Retry`,
/// `RetrySnapshot`, `RejectSnapshot`, refetch hints, ...) must actually
/// drive what happens next, so this deliberately does not fan work out to
/// a pool of concurrent submitters that would discard those responses.
///
/// `chunk_timeout` is a parameter rather than a bare use of [`CHUNK_TIMEOUT`]
/// so tests can exercise the timeout branch without waiting out the real
/// two-minute constant; [`crate::syncer::Syncer`] always calls this with
/// [`CHUNK_TIMEOUT`] itself.
pub async fn apply_chunks(
    queue: &ChunkQueue,
    pool: &SnapshotPool,
    app: &dyn AppConn,
    height: Height,
    format: Format,
    chunk_timeout: Duration,
) -> Result<(), SyncerError> {
    loop {
        let chunk = match tokio::time::timeout(chunk_timeout, queue.next()).await {
            Ok(Ok(chunk)) => chunk,
            Ok(Err(QueueError::Done)) => return Ok(()),
            Ok(Err(other)) => return Err(SyncerError::Other(anyhow::anyhow!("chunk queue error: {other}"))),
            Err(_) => return Err(SyncerError::Timeout),
        };
        debug!(height, format, index = chunk.index, "applying chunk");

        let response = app.apply_snapshot_chunk(chunk.index, &chunk.payload, &chunk.sender).await;
        match response.result {
            ApplyChunkResult::Accept => {
                crate::metrics::CHUNKS_APPLIED.inc();
            }
            ApplyChunkResult::Abort => return Err(SyncerError::Abort),
            ApplyChunkResult::Retry => {
                queue.retry(chunk.index);
            }
            ApplyChunkResult::RetrySnapshot => return Err(SyncerError::RetrySnapshot),
            ApplyChunkResult::RejectSnapshot => {
                return Err(SyncerError::RejectSnapshot("application rejected the snapshot".to_owned()));
            }
        }

        for refetch_index in response.refetch_chunks {
            queue.discard(refetch_index);
        }
        for sender in response.reject_senders.iter().filter(|p| !p.0.is_empty()) {
            pool.reject_peer(sender);
            queue.discard_sender(sender);
        }
    }
}

/// Waits for every fetcher task to exit, logging (but not propagating)
/// individual join errors. A panicking fetcher must not prevent `Sync` from
/// returning control to its caller.
pub async fn join_fetchers(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(err) = handle.await {
            if err.is_panic() {
                warn!(?err, "chunk fetcher worker panicked");
            }
        }
    }
}
