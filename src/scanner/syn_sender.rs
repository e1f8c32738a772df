//! SYN sweep over an address range.
//!
//! One probe per address, ascending, with a fixed delay before each send.
//! The sweep has two states, scanning and complete; there is no per-target
//! state beyond "sent" or "not sent", and no retransmission. A socket-level
//! send failure ends the sweep: it means the scan cannot continue at all,
//! whereas a lost SYN is indistinguishable from a lost reply and needs no
//! handling.

use std::net::Ipv4Addr;

use super::forge::PacketTemplate;
use super::pacing::Pacing;
use super::transport::PacketSend;
use crate::engine::ScanCounters;
use crate::AddressRange;

/// Progress is sampled every this many addresses (plus first and last).
pub const PROGRESS_INTERVAL: u64 = 256;

/// Error from scanner operations.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("raw socket creation failed (requires CAP_NET_RAW): {0}")]
    RawSocket(String),

    #[error("socket option failed: {0}")]
    SocketOption(String),

    #[error("packet send failed: {0}")]
    Send(String),

    #[error("packet receive failed: {0}")]
    Recv(String),

    #[error("invalid address range: end {end} is before begin {begin}")]
    InvalidRange { begin: Ipv4Addr, end: Ipv4Addr },

    #[error("interface address lookup failed: {0}")]
    Interface(String),

    #[error("results sink failed: {0}")]
    Results(String),

    #[error("scan task failed: {0}")]
    Task(String),
}

/// Snapshot reported at sampled points of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Addresses handled so far, counting the one about to be sent.
    pub done: u64,
    /// Addresses in the range.
    pub total: u64,
    /// Matching replies observed since the previous report.
    pub acks: u64,
}

impl Progress {
    /// Completed share of the range, 0–100.
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            return 100;
        }
        100 * self.done / self.total
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Progress {}% ({}/{}), {} ACKs",
            self.percent(),
            self.done,
            self.total,
            self.acks
        )
    }
}

/// Whether zero-based `index` of a `total`-address sweep is a reporting point.
///
/// True for the first address, every 256th after it, and the last.
pub fn is_progress_point(index: u64, total: u64) -> bool {
    index % PROGRESS_INTERVAL == 0 || index + 1 == total
}

/// Drives the send side of a scan.
pub struct SynSweeper {
    template: PacketTemplate,
    range: AddressRange,
    pacing: Pacing,
    sender: Box<dyn PacketSend>,
}

impl SynSweeper {
    /// Create a sweeper that forges probes from `template` and transmits
    /// them through `sender`.
    pub fn new(
        template: PacketTemplate,
        range: AddressRange,
        pacing: Pacing,
        sender: Box<dyn PacketSend>,
    ) -> Self {
        Self {
            template,
            range,
            pacing,
            sender,
        }
    }

    /// Send one SYN to every address of the range.
    ///
    /// `on_progress` is called at each sampling point with the ACK count
    /// accumulated since the previous point (the counter is reset). Returns
    /// the number of probes sent.
    ///
    /// # Errors
    /// The first `ScanError::Send` aborts the sweep; probes sent before it
    /// remain counted in `counters`.
    pub fn run<F>(&mut self, counters: &ScanCounters, mut on_progress: F) -> Result<u64, ScanError>
    where
        F: FnMut(&Progress),
    {
        let total = self.range.len();
        let mut rng = rand::thread_rng();
        let mut sent = 0u64;

        for (index, target) in (0u64..).zip(self.range.iter()) {
            if is_progress_point(index, total) {
                let progress = Progress {
                    done: index + 1,
                    total,
                    acks: counters.take_acks(),
                };
                tracing::info!(
                    percent = progress.percent(),
                    done = progress.done,
                    total = progress.total,
                    acks = progress.acks,
                    "sweep progress"
                );
                on_progress(&progress);
            }

            self.pacing.wait();

            let packet = self.template.prepare_send(target, &mut rng);
            if let Err(e) = self.sender.send_raw(packet) {
                tracing::error!(addr = %target, sent, error = %e, "SYN send failed, aborting sweep");
                return Err(e);
            }

            counters.record_sent();
            sent += 1;
        }

        tracing::info!(sent, "sweep complete");
        Ok(sent)
    }

    /// Current template (reflects the most recent probe).
    #[cfg(test)]
    pub(crate) fn template(&self) -> &PacketTemplate {
        &self.template
    }

    #[cfg(test)]
    pub(crate) fn sender(&self) -> &dyn PacketSend {
        &*self.sender
    }
}

// =============================================================================
// Tests
// =============================================================================
