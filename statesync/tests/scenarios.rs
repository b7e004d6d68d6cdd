//! End-to-end scenarios for the syncer state machine, against in-memory
//! doubles from [`statesync::test_utils`]. Named after the scenarios they
//! cover rather than after internal component names.

use statesync::test_utils::{FakeAppConn, FakeAttestOutcome, FakePeerSender, FakeTrustProvider};
use statesync::{
    AppInfo, ApplyChunkResponse, ApplyChunkResult, Chunk, ChunkIndex, OfferSnapshotResult, PeerId, SnapshotDescriptor, SyncerError,
};
use statesync::{ChunkQueue, Syncer, SyncerConfig};
use assert_matches::assert_matches;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn temp_root() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

fn fast_config() -> SyncerConfig {
    SyncerConfig { chunk_fetchers: 2, chunk_request_timeout: Duration::from_millis(50) }
}

/// Wires a [`FakePeerSender`] that, on every chunk request, synchronously
/// delivers the chunk back into whichever syncer is registered in `cell`.
/// That cell is set right after the syncer is constructed, since the sender
/// itself has to exist before the syncer that owns it.
fn deliver_immediately(cell: Arc<OnceLock<Arc<Syncer>>>) -> FakePeerSender {
    FakePeerSender::new(move |peer, request, payload| {
        if let (Some(syncer), Some(payload)) = (cell.get(), payload) {
            let chunk = Chunk { height: request.height, format: request.format, index: request.index, payload, sender: peer.clone() };
            let _ = syncer.add_chunk(chunk);
        }
    })
}

#[tokio::test]
async fn s1_happy_path() {
    let dir = temp_root();
    let app = Arc::new(FakeAppConn::new());
    let trust = Arc::new(FakeTrustProvider::new());
    let cell: Arc<OnceLock<Arc<Syncer>>> = Arc::new(OnceLock::new());
    let sender = Arc::new(deliver_immediately(cell.clone()));
    sender.set_chunk_payload(100, 1, 0, b"a".to_vec());
    sender.set_chunk_payload(100, 1, 1, b"b".to_vec());
    sender.set_chunk_payload(100, 1, 2, b"c".to_vec());
    trust.set_consensus_app_version(7);
    app.set_info(AppInfo { app_version: 7, last_block_app_hash: 100u64.to_be_bytes().to_vec(), last_block_height: 100 });

    let syncer = Arc::new(Syncer::new(fast_config(), app.clone(), app.clone(), trust, sender, dir.path()));
    cell.set(syncer.clone()).ok();

    syncer.add_snapshot(PeerId::from("p1"), SnapshotDescriptor::new(100, 1, 3, vec![0xAA], vec![])).unwrap();
    syncer.add_snapshot(PeerId::from("p2"), SnapshotDescriptor::new(100, 1, 3, vec![0xAA], vec![])).unwrap();

    let (state, _commit) =
        tokio::time::timeout(Duration::from_secs(5), syncer.sync_any(Duration::ZERO, || {})).await.unwrap().unwrap();
    assert_eq!(state.consensus_app_version, 7);

    let applied = app.applied_chunks();
    assert_eq!(applied.len(), 3);
    let mut indices: Vec<_> = applied.iter().map(|(i, ..)| *i).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
async fn s2_format_rejection_pivots_to_next_candidate() {
    let dir = temp_root();
    let app = Arc::new(FakeAppConn::new());
    let trust = Arc::new(FakeTrustProvider::new());
    let cell: Arc<OnceLock<Arc<Syncer>>> = Arc::new(OnceLock::new());
    let sender = Arc::new(deliver_immediately(cell.clone()));
    sender.set_chunk_payload(99, 1, 0, b"only-chunk".to_vec());
    app.set_offer_result(OfferSnapshotResult::RejectFormat);
    app.set_info(AppInfo { app_version: 1, last_block_app_hash: 99u64.to_be_bytes().to_vec(), last_block_height: 99 });

    let syncer = Arc::new(Syncer::new(fast_config(), app.clone(), app.clone(), trust, sender, dir.path()));
    cell.set(syncer.clone()).ok();

    syncer.add_snapshot(PeerId::from("p1"), SnapshotDescriptor::new(100, 2, 1, vec![0xBB], vec![])).unwrap();
    syncer.add_snapshot(PeerId::from("p1"), SnapshotDescriptor::new(99, 1, 1, vec![0xCC], vec![])).unwrap();

    // Flip the app back to accepting once the rejected format has been
    // pruned from the pool, so the second candidate can actually complete.
    let app_for_flip = app.clone();
    let pool_ref = syncer.clone();
    tokio::spawn(async move {
        loop {
            if pool_ref.pool().best().map(|s| s.format) == Some(1) {
                app_for_flip.set_offer_result(OfferSnapshotResult::Accept);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let (_, _) = tokio::time::timeout(Duration::from_secs(5), syncer.sync_any(Duration::ZERO, || {})).await.unwrap().unwrap();

    assert!(syncer.pool().best().is_none() || syncer.pool().best().unwrap().format != 2);
}

#[tokio::test]
async fn s3_sender_rejection_blacklists_both_peers_then_no_snapshots() {
    let dir = temp_root();
    let app = Arc::new(FakeAppConn::new());
    let trust = Arc::new(FakeTrustProvider::new());
    app.set_offer_result(OfferSnapshotResult::RejectSender);
    let sender = Arc::new(FakePeerSender::new(|_, _, _| {}));

    let syncer = Arc::new(Syncer::new(fast_config(), app.clone(), app.clone(), trust, sender, dir.path()));

    let snap = SnapshotDescriptor::new(50, 1, 1, vec![0xDD], vec![]);
    syncer.add_snapshot(PeerId::from("p1"), snap.clone()).unwrap();
    syncer.add_snapshot(PeerId::from("p2"), snap.clone()).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), syncer.sync_any(Duration::ZERO, || {}))
        .await
        .unwrap()
        .unwrap_err();
    assert_matches!(err, SyncerError::NoSnapshots);
    assert!(syncer.pool().get_peers(&snap).is_empty());
}

#[tokio::test]
async fn s4_chunk_timeout_rejects_snapshot() {
    // Exercises `apply_chunks` directly with a short `chunk_timeout`, since
    // the real 2-minute constant (`fetcher::CHUNK_TIMEOUT`) is deliberately a
    // parameter for exactly this reason (see its doc comment).
    let dir = temp_root();
    let app = Arc::new(FakeAppConn::new());
    let pool = statesync::SnapshotPool::new();
    // Chunk 0 is delivered, chunk 1 never arrives.
    let queue = ChunkQueue::new(10, 1, 2, dir.path());
    queue.add(Chunk { height: 10, format: 1, index: 0, payload: b"only".to_vec(), sender: PeerId::from("p1") }).unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        statesync::fetcher::apply_chunks(&queue, &pool, app.as_ref(), 10, 1, Duration::from_millis(50)),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert_matches!(err, SyncerError::Timeout);
    assert_eq!(app.applied_chunks().len(), 1);
}

#[tokio::test]
async fn s5_retry_snapshot_keeps_already_present_chunks() {
    let dir = temp_root();
    let app = Arc::new(FakeAppConn::new());
    let trust = Arc::new(FakeTrustProvider::new());
    app.set_chunk_response(1, ApplyChunkResponse { result: ApplyChunkResult::RetrySnapshot, refetch_chunks: vec![], reject_senders: vec![] });
    app.set_info(AppInfo { app_version: 1, last_block_app_hash: 5u64.to_be_bytes().to_vec(), last_block_height: 5 });

    let cell: Arc<OnceLock<Arc<Syncer>>> = Arc::new(OnceLock::new());
    let sender = Arc::new(deliver_immediately(cell.clone()));
    sender.set_chunk_payload(5, 1, 0, b"a".to_vec());
    sender.set_chunk_payload(5, 1, 1, b"b".to_vec());
    sender.set_chunk_payload(5, 1, 2, b"c".to_vec());

    let syncer = Arc::new(Syncer::new(fast_config(), app.clone(), app.clone(), trust, sender, dir.path()));
    cell.set(syncer.clone()).ok();
    syncer.add_snapshot(PeerId::from("p1"), SnapshotDescriptor::new(5, 1, 3, vec![0xEE], vec![])).unwrap();

    // After the first RetrySnapshot, let the app accept chunk 1 on redelivery.
    let app_for_flip = app.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        app_for_flip.set_chunk_response(1, ApplyChunkResponse::accept());
    });

    let (_state, _commit) =
        tokio::time::timeout(Duration::from_secs(5), syncer.sync_any(Duration::ZERO, || {})).await.unwrap().unwrap();

    let applied = app.applied_chunks();
    let index_0_count = applied.iter().filter(|(i, ..)| *i == 0).count();
    // Chunk 0 should only ever have been applied once: RetryAll must not
    // have discarded the already-present slot.
    assert_eq!(index_0_count, 1);
}

#[tokio::test]
async fn s6_verify_mismatch_terminates_without_retry() {
    let dir = temp_root();
    let app = Arc::new(FakeAppConn::new());
    let trust = Arc::new(FakeTrustProvider::new());
    app.set_info(AppInfo { app_version: 1, last_block_app_hash: 100u64.to_be_bytes().to_vec(), last_block_height: 99 });

    let cell: Arc<OnceLock<Arc<Syncer>>> = Arc::new(OnceLock::new());
    let sender = Arc::new(deliver_immediately(cell.clone()));
    sender.set_chunk_payload(100, 1, 0, b"a".to_vec());

    let syncer = Arc::new(Syncer::new(fast_config(), app.clone(), app.clone(), trust, sender, dir.path()));
    cell.set(syncer.clone()).ok();
    syncer.add_snapshot(PeerId::from("p1"), SnapshotDescriptor::new(100, 1, 1, vec![0xAA], vec![])).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), syncer.sync_any(Duration::ZERO, || {}))
        .await
        .unwrap()
        .unwrap_err();
    assert_matches!(err, SyncerError::VerifyFailed(_));
}

#[tokio::test]
async fn no_witnesses_from_trust_provider_propagates_unchanged() {
    // `NoWitnesses` is the one trust-provider failure that is not folded
    // into `RejectSnapshot`; it must surface as-is and terminate `SyncAny`
    // rather than pivot to the next candidate.
    let dir = temp_root();
    let app = Arc::new(FakeAppConn::new());
    let trust = Arc::new(FakeTrustProvider::new());
    trust.set_app_hash_error(FakeAttestOutcome::NoWitnesses);
    let sender = Arc::new(FakePeerSender::new(|_, _, _| {}));

    let syncer = Arc::new(Syncer::new(fast_config(), app.clone(), app, trust, sender, dir.path()));
    syncer.add_snapshot(PeerId::from("p1"), SnapshotDescriptor::new(100, 1, 1, vec![0xAA], vec![])).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), syncer.sync_any(Duration::ZERO, || {}))
        .await
        .unwrap()
        .unwrap_err();
    assert_matches!(err, SyncerError::NoWitnesses);
}

/// Runs a happy-path restore of a `chunk_count`-chunk snapshot with the given
/// fetcher pool size and returns the indices in the order they were actually
/// submitted to the application.
async fn applied_chunk_order_with_fetchers(chunk_fetchers: u8, chunk_count: u32) -> Vec<ChunkIndex> {
    let dir = temp_root();
    let app = Arc::new(FakeAppConn::new());
    let trust = Arc::new(FakeTrustProvider::new());
    let cell: Arc<OnceLock<Arc<Syncer>>> = Arc::new(OnceLock::new());
    let sender = Arc::new(deliver_immediately(cell.clone()));
    for index in 0..chunk_count {
        sender.set_chunk_payload(100, 1, index, vec![index as u8]);
    }
    trust.set_consensus_app_version(7);
    app.set_info(AppInfo { app_version: 7, last_block_app_hash: 100u64.to_be_bytes().to_vec(), last_block_height: 100 });

    let config = SyncerConfig { chunk_fetchers, chunk_request_timeout: Duration::from_millis(50) };
    let syncer = Arc::new(Syncer::new(config, app.clone(), app.clone(), trust, sender, dir.path()));
    cell.set(syncer.clone()).ok();

    syncer.add_snapshot(PeerId::from("p1"), SnapshotDescriptor::new(100, 1, chunk_count, vec![0xAA], vec![])).unwrap();

    tokio::time::timeout(Duration::from_secs(5), syncer.sync_any(Duration::ZERO, || {})).await.unwrap().unwrap();

    app.applied_chunks().into_iter().map(|(index, ..)| index).collect()
}

#[tokio::test]
async fn chunk_fetcher_count_does_not_change_applied_chunk_order() {
    let chunk_count = 10;
    let expected: Vec<ChunkIndex> = (0..chunk_count).collect();

    let with_one_fetcher = applied_chunk_order_with_fetchers(1, chunk_count).await;
    let with_sixteen_fetchers = applied_chunk_order_with_fetchers(16, chunk_count).await;

    assert_eq!(with_one_fetcher, expected);
    assert_eq!(with_sixteen_fetchers, expected);
}
