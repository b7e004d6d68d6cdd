//! State-sync orchestrator: bootstraps a replica straight from a snapshot
//! instead of replaying the whole log, the way `near-client`'s
//! `chain/client/src/sync/state` module bootstraps a shard from state-sync
//! parts instead of block-by-block catchup.
//!
//! The public surface is [`Syncer`]: construct one per replica with
//! [`Syncer::new`], feed it peer-reported snapshots and chunks through
//! [`Syncer::add_snapshot`]/[`Syncer::add_chunk`]/[`Syncer::add_peer`]/
//! [`Syncer::remove_peer`], and drive restoration with
//! [`Syncer::sync_any`] (try candidates until one works) or
//! [`Syncer::sync`] (attempt one specific snapshot).

pub mod app_conn;
pub mod fetcher;
pub mod metrics;
pub mod network;
pub mod pool;
pub mod queue;
pub mod syncer;
pub mod test_utils;
pub mod trust;

pub use app_conn::AppConn;
pub use network::PeerSender;
pub use pool::{PoolError, SnapshotPool};
pub use queue::{ChunkQueue, QueueError};
pub use syncer::{Syncer, MINIMUM_DISCOVERY_TIME};
pub use trust::{TrustProvider, TRUST_PROVIDER_TIMEOUT};

pub use statesync_config::SyncerConfig;
pub use statesync_primitives::*;
