use serde::{Deserialize, Serialize};

/// Direction of a peer connection, from the local node's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The peer connected to us
    Inbound,
    /// We connected to the peer
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Geographic information for a peer's IP address
///
/// Keyed uniquely by `ip`. Once fetched, a record is reused for as long as
/// the cache TTL allows, because the upstream lookup service is rate-limited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationRecord {
    pub ip: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
    pub isp: String,
    pub as_org: String,
    /// Unix timestamp of when this record was fetched
    pub fetched_at: i64,
}

/// One connected peer as reported by the node, normalized into typed fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Network address including port, e.g. "203.0.113.5:8333"
    pub addr: String,
    pub direction: Direction,
    /// Protocol/user-agent version string as reported by the peer
    pub protocol_version: String,
    /// Service flags bitmask
    pub services: u64,
    /// Round-trip ping time in milliseconds, absent until measured
    pub ping_millis: Option<f64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Unix timestamp of when the connection was established
    pub connected_since: i64,
    /// Geolocation, absent until resolved
    pub geo: Option<GeolocationRecord>,
}

impl PeerRecord {
    /// The peer's IP without the port, used for geolocation and bans
    pub fn ip(&self) -> &str {
        // Handles "[::1]:8333" as well as "1.2.3.4:8333"
        if let Some(rest) = self.addr.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                return &rest[..end];
            }
        }
        match self.addr.rfind(':') {
            Some(idx) => &self.addr[..idx],
            None => &self.addr,
        }
    }

    /// Seconds this peer has been connected, as of `now`
    pub fn connection_duration(&self, now: i64) -> i64 {
        (now - self.connected_since).max(0)
    }

    /// Short human-readable summary recorded in execution logs
    pub fn summary(&self) -> String {
        format!(
            "{} {} ver={} ping={} sent={} recv={}",
            self.addr,
            self.direction,
            self.protocol_version,
            self.ping_millis
                .map(|p| format!("{:.0}ms", p))
                .unwrap_or_else(|| "n/a".to_string()),
            self.bytes_sent,
            self.bytes_received,
        )
    }
}

/// Immutable point-in-time view of all connected peers
///
/// Captured once per evaluation cycle; every rule in that cycle sees the
/// same snapshot. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Unix timestamp of when the snapshot was taken
    pub taken_at: i64,
    /// True when the peer list came from stale or synthetic data
    pub is_fallback: bool,
    pub peers: Vec<PeerRecord>,
}

impl PeerSnapshot {
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(addr: &str) -> PeerRecord {
        PeerRecord {
            addr: addr.to_string(),
            direction: Direction::Outbound,
            protocol_version: "/Satoshi:25.0.0/".to_string(),
            services: 1033,
            ping_millis: Some(42.0),
            bytes_sent: 1000,
            bytes_received: 2000,
            connected_since: 1_700_000_000,
            geo: None,
        }
    }

    #[test]
    fn test_ip_strips_port() {
        assert_eq!(peer("203.0.113.5:8333").ip(), "203.0.113.5");
    }

    #[test]
    fn test_ip_handles_ipv6_brackets() {
        assert_eq!(peer("[2001:db8::1]:8333").ip(), "2001:db8::1");
    }

    #[test]
    fn test_ip_without_port() {
        assert_eq!(peer("203.0.113.5").ip(), "203.0.113.5");
    }

    #[test]
    fn test_connection_duration_never_negative() {
        let p = peer("203.0.113.5:8333");
        assert_eq!(p.connection_duration(p.connected_since - 100), 0);
        assert_eq!(p.connection_duration(p.connected_since + 60), 60);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Inbound.to_string(), "inbound");
        assert_eq!(Direction::Outbound.to_string(), "outbound");
    }
}
