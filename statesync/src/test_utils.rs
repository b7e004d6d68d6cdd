//! In-memory test doubles for [`AppConn`], [`TrustProvider`], and
//! [`PeerSender`]. A normal, always-compiled module (not `#[cfg(test)]`),
//! the way `near-client`'s own `test_utils.rs` is shared between in-crate
//! unit tests and the crate's `tests/` integration suite.

use crate::app_conn::AppConn;
use crate::network::{ChunkRequest, PeerSender, SnapshotsRequest};
use crate::trust::TrustProvider;
use async_trait::async_trait;
use parking_lot::Mutex;
use statesync_primitives::{
    AppInfo, ApplyChunkResponse, BlockCommit, ChunkIndex, Height, OfferSnapshotResult, PeerId, ReplicatedState, SyncerError,
};
use std::collections::HashMap;
use std::sync::Arc;

/// A scripted [`AppConn`] double: records every call it receives and answers
/// from caller-supplied canned responses, falling back to `Accept`-shaped
/// defaults so a test only needs to override what it cares about.
#[derive(Default)]
pub struct FakeAppConn {
    state: Mutex<FakeAppConnState>,
}

#[derive(Default)]
struct FakeAppConnState {
    offer_snapshot_result: Option<OfferSnapshotResult>,
    offer_snapshot_result_by_format: HashMap<u32, OfferSnapshotResult>,
    chunk_responses: HashMap<ChunkIndex, ApplyChunkResponse>,
    applied_chunks: Vec<(ChunkIndex, Vec<u8>, PeerId)>,
    info: Option<AppInfo>,
}

impl FakeAppConn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the answer for every `OfferSnapshot` call regardless of format.
    pub fn set_offer_result(&self, result: OfferSnapshotResult) {
        self.state.lock().offer_snapshot_result = Some(result);
    }

    /// Sets the answer for `OfferSnapshot` calls carrying exactly this
    /// format, taking precedence over [`FakeAppConn::set_offer_result`]. This
    /// lets a test script "reject this format, then accept the next
    /// candidate" without racing a background task against the syncer's own
    /// pivot.
    pub fn set_offer_result_for_format(&self, format: u32, result: OfferSnapshotResult) {
        self.state.lock().offer_snapshot_result_by_format.insert(format, result);
    }

    pub fn set_chunk_response(&self, index: ChunkIndex, response: ApplyChunkResponse) {
        self.state.lock().chunk_responses.insert(index, response);
    }

    pub fn set_info(&self, info: AppInfo) {
        self.state.lock().info = Some(info);
    }

    pub fn applied_chunks(&self) -> Vec<(ChunkIndex, Vec<u8>, PeerId)> {
        self.state.lock().applied_chunks.clone()
    }
}

#[async_trait]
impl AppConn for FakeAppConn {
    async fn offer_snapshot(&self, _height: Height, format: u32, _app_hash: &[u8]) -> OfferSnapshotResult {
        let state = self.state.lock();
        if let Some(result) = state.offer_snapshot_result_by_format.get(&format) {
            return *result;
        }
        state.offer_snapshot_result.unwrap_or(OfferSnapshotResult::Accept)
    }

    async fn apply_snapshot_chunk(&self, index: ChunkIndex, payload: &[u8], sender: &PeerId) -> ApplyChunkResponse {
        let mut state = self.state.lock();
        state.applied_chunks.push((index, payload.to_vec(), sender.clone()));
        state.chunk_responses.remove(&index).unwrap_or_else(ApplyChunkResponse::accept)
    }

    async fn info(&self) -> AppInfo {
        self.state
            .lock()
            .info
            .clone()
            .unwrap_or(AppInfo { app_version: 1, last_block_app_hash: Vec::new(), last_block_height: 0 })
    }
}

/// A scripted [`TrustProvider`] double: by default attests whatever height it
/// is asked about with a deterministic, height-derived hash, so a happy-path
/// test needs no setup at all.
#[derive(Default)]
pub struct FakeTrustProvider {
    state: Mutex<FakeTrustProviderState>,
}

/// What [`FakeTrustProvider::app_hash`] should do instead of attesting
/// normally. Kept as a plain enum rather than a stored `SyncerError` since
/// the latter isn't `Clone`.
#[derive(Clone, Copy, Debug)]
pub enum FakeAttestOutcome {
    NoWitnesses,
    RejectSnapshot,
}

#[derive(Default)]
struct FakeTrustProviderState {
    app_hash_override: Option<FakeAttestOutcome>,
    consensus_app_version: u32,
}

impl FakeTrustProvider {
    pub fn new() -> Self {
        Self { state: Mutex::new(FakeTrustProviderState { app_hash_override: None, consensus_app_version: 1 }) }
    }

    pub fn set_app_hash_error(&self, outcome: FakeAttestOutcome) {
        self.state.lock().app_hash_override = Some(outcome);
    }

    pub fn set_consensus_app_version(&self, version: u32) {
        self.state.lock().consensus_app_version = version;
    }

    fn deterministic_hash(height: Height) -> Vec<u8> {
        height.to_be_bytes().to_vec()
    }
}

#[async_trait]
impl TrustProvider for FakeTrustProvider {
    async fn app_hash(&self, height: Height) -> Result<Vec<u8>, SyncerError> {
        match self.state.lock().app_hash_override {
            Some(FakeAttestOutcome::NoWitnesses) => return Err(SyncerError::NoWitnesses),
            Some(FakeAttestOutcome::RejectSnapshot) => {
                return Err(SyncerError::RejectSnapshot("fake trust provider configured to fail".to_owned()))
            }
            None => {}
        }
        Ok(Self::deterministic_hash(height))
    }

    async fn state(&self, _height: Height) -> Result<ReplicatedState, SyncerError> {
        let version = self.state.lock().consensus_app_version;
        Ok(ReplicatedState { consensus_app_version: version, raw: Vec::new() })
    }

    async fn commit(&self, _height: Height) -> Result<BlockCommit, SyncerError> {
        Ok(BlockCommit { raw: Vec::new() })
    }
}

/// An in-memory [`PeerSender`] double that records every request and, for
/// chunk requests, immediately serves the payload from a caller-populated
/// table back into a target [`ChunkQueue`]-shaped channel via a callback.
pub struct FakePeerSender {
    chunk_requests: Mutex<Vec<(PeerId, ChunkRequest)>>,
    snapshots_requests: Mutex<Vec<(PeerId, SnapshotsRequest)>>,
    chunk_payloads: Mutex<HashMap<(Height, u32, ChunkIndex), Vec<u8>>>,
    on_chunk_request: Arc<dyn Fn(&PeerId, &ChunkRequest, Option<Vec<u8>>) + Send + Sync>,
}

impl FakePeerSender {
    /// `on_chunk_request` is invoked synchronously for every chunk request,
    /// receiving the looked-up payload (if one was registered via
    /// [`FakePeerSender::set_chunk_payload`]) so a test can feed it straight
    /// back into a [`crate::queue::ChunkQueue`].
    pub fn new(on_chunk_request: impl Fn(&PeerId, &ChunkRequest, Option<Vec<u8>>) + Send + Sync + 'static) -> Self {
        Self {
            chunk_requests: Mutex::new(Vec::new()),
            snapshots_requests: Mutex::new(Vec::new()),
            chunk_payloads: Mutex::new(HashMap::new()),
            on_chunk_request: Arc::new(on_chunk_request),
        }
    }

    pub fn set_chunk_payload(&self, height: Height, format: u32, index: ChunkIndex, payload: Vec<u8>) {
        self.chunk_payloads.lock().insert((height, format, index), payload);
    }

    pub fn chunk_requests(&self) -> Vec<(PeerId, ChunkRequest)> {
        self.chunk_requests.lock().clone()
    }

    pub fn snapshots_requests(&self) -> Vec<(PeerId, SnapshotsRequest)> {
        self.snapshots_requests.lock().clone()
    }
}

#[async_trait]
impl PeerSender for FakePeerSender {
    async fn send_chunk_request(&self, peer: &PeerId, request: ChunkRequest) {
        let payload = self.chunk_payloads.lock().get(&(request.height, request.format, request.index)).cloned();
        self.chunk_requests.lock().push((peer.clone(), request.clone()));
        (self.on_chunk_request)(peer, &request, payload);
    }

    async fn send_snapshots_request(&self, peer: &PeerId, request: SnapshotsRequest) {
        self.snapshots_requests.lock().push((peer.clone(), request));
    }
}
