//! Error taxonomy for a single `Sync` attempt, classified by how `SyncAny`'s
//! outer loop should react. Mirrors the `thiserror`-derived style
//! of `near-client-primitives`'s error types: one variant per failure kind,
//! `Display` carrying the diagnostic text an operator would actually read.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncerError {
    /// The application engine aborted state sync outright.
    #[error("application aborted state sync")]
    Abort,

    /// The application asked to retry the same snapshot, keeping delivered chunks.
    #[error("application requested a retry of the current snapshot")]
    RetrySnapshot,

    /// The snapshot itself is unusable; reject it and move to the next candidate.
    #[error("snapshot rejected: {0}")]
    RejectSnapshot(String),

    /// The snapshot's format is unusable; reject the format globally.
    #[error("snapshot format {0} rejected")]
    RejectFormat(u32),

    /// The peer(s) that advertised the snapshot are untrustworthy.
    #[error("sender of the snapshot was rejected")]
    RejectSender,

    /// `queue.Next()` waited longer than the configured chunk timeout.
    #[error("timed out waiting for the next chunk")]
    Timeout,

    /// Restoration completed but the restored state did not match the
    /// independently attested reference.
    #[error("state verification failed: {0}")]
    VerifyFailed(String),

    /// The trust provider has no witnesses for the requested height. Not
    /// recoverable within the current attempt; propagated unchanged.
    #[error("trust provider has no witnesses for the requested height")]
    NoWitnesses,

    /// The snapshot pool is empty and no further discovery was requested.
    #[error("no snapshots available to sync from")]
    NoSnapshots,

    /// A `Sync` call was already active on this syncer instance.
    #[error("a sync is already in progress")]
    AlreadyInProgress,

    /// Any other, unclassified failure. Always surfaced, wrapped with context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncerError {
    /// `true` when `SyncAny`'s outer loop must terminate and surface this
    /// error to its caller rather than reject/retry internally.
    pub fn terminates_sync_any(&self) -> bool {
        matches!(
            self,
            SyncerError::Abort
                | SyncerError::VerifyFailed(_)
                | SyncerError::NoWitnesses
                | SyncerError::NoSnapshots
                | SyncerError::AlreadyInProgress
                | SyncerError::Other(_)
        )
    }
}
