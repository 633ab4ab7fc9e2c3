//! Core data types shared across the sniffer engine.

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Shared shutdown flag used to signal graceful termination across all
/// pipeline threads.
pub type ShutdownFlag = Arc<AtomicBool>;

// ── Clock ────────────────────────────────────────────────────────────────────

/// Pluggable wall-clock source.
///
/// Production code uses [`system_clock`]; tests substitute a fake that
/// advances deterministically.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The real wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

// ── Flow identity ────────────────────────────────────────────────────────────

/// Identifies one client↔server connection from the monitored port's
/// perspective.
///
/// The request side of a flow keys on `(dst_ip, src_port)` and the
/// response side on `(src_ip, dst_port)`, so both halves of the same
/// connection resolve to the same `FlowId`.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct FlowId {
    pub peer: IpAddr,
    pub client_port: u16,
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.peer, self.client_port)
    }
}

// ── Round trips ──────────────────────────────────────────────────────────────

/// One matched request/response pair.
///
/// `timestamp` is the wall-clock time at which the response was fully
/// consumed from its stream.
#[derive(Debug, Clone)]
pub struct RoundTrip {
    pub host: String,
    pub path: String,
    pub request_size: u64,
    pub response_size: u64,
    pub timestamp: DateTime<Utc>,
}

/// Derives the reporting section for a request: the host joined with the
/// first path segment. An empty or bare-root path maps to `host/`.
pub fn section_key(host: &str, path: &str) -> String {
    let path = if path.is_empty() { "/" } else { path };
    let mut parts = path.splitn(3, '/');
    let head = parts.next().unwrap_or_default();
    match parts.next() {
        Some(first) => format!("{}{}/{}", host, head, first),
        None => format!("{}{}", host, head),
    }
}

// ── Session statistics ───────────────────────────────────────────────────────

/// Atomically-updated counters accumulated over a monitoring run and
/// reported in the shutdown summary.
pub struct SessionStats {
    /// Raw packets seen by the capture loop.
    pub packets_total: AtomicU64,
    /// Half-streams handed to parser tasks.
    pub streams_opened: AtomicU64,
    /// Round trips emitted by response parsers.
    pub round_trips_total: AtomicU64,
    /// Response-side streams with no registered request queue.
    pub unpaired_responses: AtomicU64,
    /// Malformed or truncated HTTP messages.
    pub parse_errors: AtomicU64,
    /// Segments dropped because a parser fell behind its stream buffer.
    pub reassembly_drops: AtomicU64,
    /// Alert trigger/recovery events emitted.
    pub alerts_emitted: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            packets_total: AtomicU64::new(0),
            streams_opened: AtomicU64::new(0),
            round_trips_total: AtomicU64::new(0),
            unpaired_responses: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            reassembly_drops: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
        })
    }
}

/// Shared alias for the session statistics.
pub type SharedStats = Arc<SessionStats>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn section_key_uses_first_path_segment() {
        assert_eq!(
            section_key("my.site.com", "/pages/create"),
            "my.site.com/pages"
        );
        assert_eq!(
            section_key("my.site.com", "/foo/bar/baz"),
            "my.site.com/foo"
        );
    }

    #[test]
    fn section_key_maps_root_and_empty_to_slash() {
        assert_eq!(section_key("my.site.com", "/"), "my.site.com/");
        assert_eq!(section_key("my.site.com", ""), "my.site.com/");
    }

    #[test]
    fn section_key_is_idempotent_per_input() {
        let a = section_key("ex.com", "/a/b");
        let b = section_key("ex.com", "/a/b");
        assert_eq!(a, b);
    }

    #[test]
    fn flow_id_display_is_peer_and_port() {
        let flow = FlowId {
            peer: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            client_port: 43210,
        };
        assert_eq!(flow.to_string(), "10.0.0.1:43210");
    }
}
