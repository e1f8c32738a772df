//! nscan — stateless TCP SYN scanner.
//!
//! Forges one SYN per address of a contiguous IPv4 range from a single
//! pre-built packet template (patching the TCP checksum incrementally per
//! target) while a concurrent receiver classifies SYN-ACK replies by header
//! match alone. No per-target connection state is kept: a target is either
//! "sent" or "not sent", and any reply that matches the scan's port pair is
//! attributed to the scan.
//!
//! Usable as a library or via the `nscan` binary.

pub mod cli;
pub mod engine;
pub mod scanner;

use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Re-export key types for library users.
pub use engine::{ScanCounters, ScannerContext, StopSignal};
pub use scanner::forge::{build_template, PacketTemplate};
pub use scanner::pacing::{Pacing, PacingProfile};
pub use scanner::syn_sender::{Progress, ScanError};

/// Ephemeral port range the scan's source port is drawn from.
pub const EPHEMERAL_PORTS: (u16, u16) = (49152, 65535);

/// Default receive poll timeout: how long one blocking read may wait before
/// the receiver re-checks the termination flag.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Default drain window: how long the receiver keeps reading replies that
/// are still arriving after the last SYN went out.
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Address range
// ─────────────────────────────────────────────────────────────────────────────

/// Contiguous, inclusive IPv4 address range.
///
/// Always holds at least one address: construction rejects `end < begin`,
/// and so does deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RangeBounds")]
pub struct AddressRange {
    begin: Ipv4Addr,
    end: Ipv4Addr,
}

/// Unchecked wire form of [`AddressRange`].
#[derive(Deserialize)]
struct RangeBounds {
    begin: Ipv4Addr,
    end: Ipv4Addr,
}

impl TryFrom<RangeBounds> for AddressRange {
    type Error = ScanError;

    fn try_from(bounds: RangeBounds) -> Result<Self, Self::Error> {
        Self::new(bounds.begin, bounds.end)
    }
}

impl AddressRange {
    /// Build the range `[begin, end]`.
    ///
    /// # Errors
    /// `ScanError::InvalidRange` when `end` sorts before `begin`.
    pub fn new(begin: Ipv4Addr, end: Ipv4Addr) -> Result<Self, ScanError> {
        if u32::from(end) < u32::from(begin) {
            return Err(ScanError::InvalidRange { begin, end });
        }
        Ok(Self { begin, end })
    }

    /// First address of the range.
    pub fn begin(&self) -> Ipv4Addr {
        self.begin
    }

    /// Last address of the range (inclusive).
    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    /// Number of addresses covered. `u64` so the full IPv4 space fits.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        u32::from(self.end) as u64 - u32::from(self.begin) as u64 + 1
    }

    /// Address at zero-based `index`, or `None` past the end.
    #[cfg(test)]
    pub(crate) fn get(&self, index: u64) -> Option<Ipv4Addr> {
        if index >= self.len() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.begin) + index as u32))
    }

    /// Addresses in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
        (u32::from(self.begin)..=u32::from(self.end)).map(Ipv4Addr::from)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.begin, self.end)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scan configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the scan engine needs to know. Not modified once a scan starts.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Address written into the IP source field of every probe.
    pub source_ip: Ipv4Addr,
    /// TCP source port of every probe; replies must target it.
    pub source_port: u16,
    /// TCP destination port probed on every target.
    pub dest_port: u16,
    /// Targets, scanned in ascending order.
    pub range: AddressRange,
    /// Fixed delay applied before every probe.
    pub pacing: Pacing,
    /// Upper bound on a single blocking read of the receive socket.
    pub recv_timeout: Duration,
    /// Time the receiver keeps collecting after the sender finishes.
    pub drain_window: Duration,
}

impl ScanConfig {
    /// Create a config with a random ephemeral source port and default pacing.
    pub fn new(source_ip: Ipv4Addr, dest_port: u16, range: AddressRange) -> Self {
        Self {
            source_ip,
            source_port: random_source_port(),
            dest_port,
            range,
            pacing: Pacing::default(),
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }

    /// Pin the source port instead of using a random one.
    pub fn with_source_port(mut self, port: u16) -> Self {
        self.source_port = port;
        self
    }

    /// Replace the inter-probe pacing.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Replace the receive poll timeout.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Replace the post-sweep drain window.
    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }
}

/// Pick a random port from [`EPHEMERAL_PORTS`].
pub fn random_source_port() -> u16 {
    rand::thread_rng().gen_range(EPHEMERAL_PORTS.0..=EPHEMERAL_PORTS.1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scan summary
// ─────────────────────────────────────────────────────────────────────────────

/// Final report of a scan.
///
/// Produced even when the sender or receiver failed mid-scan: counters and
/// results recorded up to the failure stay valid, and the failure is carried
/// in `error` / `receiver_error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Unique identifier of this scan run.
    pub scan_id: Uuid,
    /// Probe source address.
    pub source_ip: Ipv4Addr,
    /// Probe source port.
    pub source_port: u16,
    /// Probed destination port.
    pub dest_port: u16,
    /// Scanned range.
    pub range: AddressRange,
    /// Inter-probe pacing the sweep ran with.
    pub pacing: Pacing,
    /// Number of addresses in the range.
    pub addresses: u64,
    /// SYN probes sent.
    pub sent: u64,
    /// Matching SYN-ACK replies recorded.
    pub received: u64,
    /// Records written to the results sink.
    pub written: u64,
    /// Wall-clock scan duration in milliseconds.
    pub duration_ms: u64,
    /// Timestamp when the sweep started.
    pub started_at: DateTime<Utc>,
    /// Timestamp when both tasks had stopped.
    pub finished_at: DateTime<Utc>,
    /// Sender or results-writer failure, if any.
    pub error: Option<String>,
    /// Receiver failure, if any.
    pub receiver_error: Option<String>,
}

impl ScanSummary {
    /// True when any component reported a failure.
    pub fn has_error(&self) -> bool {
        self.error.is_some() || self.receiver_error.is_some()
    }

    /// True when every address was probed and nothing failed.
    pub fn is_complete(&self) -> bool {
        !self.has_error() && self.sent == self.addresses
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
