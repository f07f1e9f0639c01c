//! Peer snapshot provider
//!
//! Produces the immutable, timestamped view of all connected peers that an
//! evaluation cycle runs against. The peer list is read through the cache
//! store (one node call per TTL window, shared by concurrent callers) and
//! normalized from the node's raw JSON into typed [`PeerRecord`]s, then
//! enriched with cached geolocation.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{CacheError, CacheStore, Fetched};
use crate::config::CacheConfig;
use crate::gateway::{methods, RpcError, RpcGateway};
use crate::geolocation::GeoLookupService;
use crate::models::{Direction, GeolocationRecord, PeerRecord, PeerSnapshot};

/// Cache key of the peer list
const PEER_LIST_KEY: &str = "rpc:peerlist";

/// Errors that can occur while building a snapshot
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("peer list unavailable: {0}")]
    Unavailable(#[from] CacheError<RpcError>),

    #[error("peer list had unexpected shape: {0}")]
    BadShape(String),
}

/// Builds consistent per-cycle views of the node's peer set
pub struct PeerSnapshotProvider {
    gateway: Arc<dyn RpcGateway>,
    cache: Arc<CacheStore>,
    geo: Option<GeoLookupService>,
    ttls: CacheConfig,
}

impl PeerSnapshotProvider {
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        cache: Arc<CacheStore>,
        geo: Option<GeoLookupService>,
        ttls: CacheConfig,
    ) -> Self {
        PeerSnapshotProvider {
            gateway,
            cache,
            geo,
            ttls,
        }
    }

    /// Capture the current peer set
    ///
    /// With `use_cache` a fresh cached list is served as-is; without it the
    /// node is always asked. The snapshot's `taken_at` is the fetch time of
    /// the data it was built from, and `is_fallback` is set whenever the
    /// list is stale-served or synthetic.
    pub async fn current(&self, use_cache: bool) -> Result<PeerSnapshot, SnapshotError> {
        let gateway = Arc::clone(&self.gateway);
        let fetch = move || async move {
            gateway
                .call(methods::LIST_PEERS, Value::Null)
                .await
                .map(Fetched::from)
        };

        let entry = if use_cache {
            self.cache
                .get_or_fetch(PEER_LIST_KEY, self.ttls.peer_ttl_seconds, fetch)
                .await?
        } else {
            self.cache
                .force_refresh(PEER_LIST_KEY, self.ttls.peer_ttl_seconds, fetch)
                .await?
        };

        let raw = entry
            .value
            .as_array()
            .ok_or_else(|| SnapshotError::BadShape("peer list is not an array".to_string()))?;

        let mut peers = Vec::with_capacity(raw.len());
        for item in raw {
            match normalize_peer(item) {
                Some(peer) => peers.push(peer),
                None => log::warn!("Skipping unparseable peer entry: {}", item),
            }
        }

        // Synthetic and stale-served peers are not enriched; the lookup
        // source is rate-limited and their addresses may not be real.
        if self.geo.is_some() && !entry.is_fallback {
            for peer in &mut peers {
                peer.geo = self.resolve_geo(peer.ip()).await;
            }
        }

        log::debug!(
            "Snapshot: {} peer(s), fallback={}",
            peers.len(),
            entry.is_fallback
        );

        Ok(PeerSnapshot {
            taken_at: entry.fetched_at,
            is_fallback: entry.is_fallback,
            peers,
        })
    }

    /// Shed cache keys no longer worth keeping; see [`CacheStore::prune`]
    pub fn prune_cache(&self, now: i64) -> usize {
        self.cache.prune(now)
    }

    /// Geolocation for one IP, through the cache
    ///
    /// Unresolvable addresses stay unresolved (the record is simply absent);
    /// country predicates against such peers evaluate false.
    async fn resolve_geo(&self, ip: &str) -> Option<GeolocationRecord> {
        let geo = self.geo.as_ref()?;
        let key = format!("geo:{}", ip);
        let lookup = geo.clone();
        let ip_owned = ip.to_string();

        let entry = self
            .cache
            .get_or_fetch(&key, self.ttls.geo_ttl_seconds, move || async move {
                let record = lookup.lookup(&ip_owned).await?;
                Ok::<_, crate::geolocation::GeoError>(Fetched::live(
                    serde_json::to_value(&record).unwrap_or(Value::Null),
                ))
            })
            .await
            .ok()?;

        serde_json::from_value(entry.value).ok()
    }
}

/// Normalize one raw peer object into a typed record
///
/// The node reports services as a hex string and ping time as float
/// seconds; both are normalized here. Returns None when the required
/// fields are missing.
fn normalize_peer(value: &Value) -> Option<PeerRecord> {
    let addr = value.get("addr")?.as_str()?.to_string();
    let inbound = value.get("inbound").and_then(Value::as_bool).unwrap_or(false);

    let services = match value.get("services") {
        Some(Value::String(hex)) => u64::from_str_radix(hex, 16).unwrap_or(0),
        Some(v) => v.as_u64().unwrap_or(0),
        None => 0,
    };

    let ping_millis = value
        .get("pingtime")
        .and_then(Value::as_f64)
        .map(|seconds| seconds * 1000.0);

    Some(PeerRecord {
        addr,
        direction: if inbound {
            Direction::Inbound
        } else {
            Direction::Outbound
        },
        protocol_version: value
            .get("subver")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        services,
        ping_millis,
        bytes_sent: value.get("bytessent").and_then(Value::as_u64).unwrap_or(0),
        bytes_received: value.get("bytesrecv").and_then(Value::as_u64).unwrap_or(0),
        connected_since: value.get("conntime").and_then(Value::as_i64).unwrap_or(0),
        geo: None,
    })
}
