//! Trust-provider adapter (C4): a thin typed wrapper over `AppHash`,
//! `State`, and `Commit`, each bounded by a 30-second scoped deadline. The
//! trust provider itself, typically a light client over a consensus network,
//! lives elsewhere; this trait only fixes the calls the syncer relies on.

use async_trait::async_trait;
use statesync_primitives::{BlockCommit, Height, ReplicatedState, SyncerError};

/// Every trust-provider call is bounded by this scoped deadline.
pub const TRUST_PROVIDER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[async_trait]
pub trait TrustProvider: Send + Sync + 'static {
    /// The independently attested application hash at `height`.
    ///
    /// `Err(SyncerError::NoWitnesses)` is non-recoverable within the current
    /// attempt and must propagate unchanged; any other error is a reason to
    /// reject this snapshot.
    async fn app_hash(&self, height: Height) -> Result<Vec<u8>, SyncerError>;

    /// The full replicated-state descriptor at `height`.
    async fn state(&self, height: Height) -> Result<ReplicatedState, SyncerError>;

    /// The block commitment at `height`, used by the caller to bootstrap.
    async fn commit(&self, height: Height) -> Result<BlockCommit, SyncerError>;
}

/// Runs `fut` under the 30-second trust-provider deadline, mapping a timeout
/// into the same "reject this snapshot" bucket that any other trust-provider
/// error falls into, except `NoWitnesses` which is carved out by the caller
/// before this wrapper is reached.
pub async fn with_trust_deadline<T>(
    fut: impl std::future::Future<Output = Result<T, SyncerError>>,
) -> Result<T, SyncerError> {
    match tokio::time::timeout(TRUST_PROVIDER_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncerError::RejectSnapshot("trust provider call timed out".to_owned())),
    }
}
