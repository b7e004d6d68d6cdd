//! Typed configuration for the state-sync orchestrator.
//!
//! Mirrors `near-chain-configs::client_config`'s style: a small `serde`
//! struct with `#[serde(default = "...")]` per tunable and a `SmartDefault`
//! derive for the struct-level `Default` impl, rather than a hand-rolled one.
//!
//! Only the values that are genuinely operator-tunable live here. The fixed
//! policy deadlines (the trust-provider deadline, the chunk timeout, and the
//! minimum discovery time) are not configuration; they are constants in
//! `statesync::syncer`, the same way `CHUNK_REQUEST_RETRY` and friends are
//! `const`s in `shards_manager_actor.rs` rather than config fields.

use smart_default::SmartDefault;
use std::time::Duration;

fn default_chunk_request_timeout() -> Duration {
    Duration::from_secs(1)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Configuration recognised by the state-sync orchestrator.
#[derive(Clone, Copy, Debug, SmartDefault, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    /// Number of concurrent chunk-fetcher workers (C6).
    #[default(4)]
    pub chunk_fetchers: u8,

    /// Per-attempt timeout before a fetcher re-requests a chunk from a
    /// different peer.
    #[serde(with = "duration_millis")]
    #[default(_code = "default_chunk_request_timeout()")]
    pub chunk_request_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SyncerConfig::default();
        assert_eq!(cfg.chunk_fetchers, 4);
        assert_eq!(cfg.chunk_request_timeout, Duration::from_secs(1));
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = SyncerConfig { chunk_fetchers: 8, chunk_request_timeout: Duration::from_millis(500) };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SyncerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chunk_fetchers, 8);
        assert_eq!(back.chunk_request_timeout, Duration::from_millis(500));
    }
}
