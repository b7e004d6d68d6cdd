//! Application-connection adapter (C3): a thin typed wrapper over the
//! `OfferSnapshot`, `ApplySnapshotChunk`, and `Info` exchanges with the local
//! application engine. The underlying transport (a request/response channel
//! to a separate process) lives elsewhere; this trait fixes the three calls
//! the syncer relies on, the way `near-client`'s `ChainSenderForStateSync`
//! fixes the shape of calls the state-sync module makes back onto the actor
//! that owns the `Chain`.

use async_trait::async_trait;
use statesync_primitives::{AppInfo, ApplyChunkResponse, ChunkIndex, Height, OfferSnapshotResult, PeerId};

#[async_trait]
pub trait AppConn: Send + Sync + 'static {
    /// Offers a snapshot for restoration, carrying the independently
    /// attested `app_hash` bound to it by the trust provider.
    async fn offer_snapshot(&self, height: Height, format: u32, app_hash: &[u8]) -> OfferSnapshotResult;

    /// Submits one chunk for application, in ascending index order.
    async fn apply_snapshot_chunk(&self, index: ChunkIndex, payload: &[u8], sender: &PeerId) -> ApplyChunkResponse;

    /// Queries the application's post-restoration state for verification.
    async fn info(&self) -> AppInfo;
}
