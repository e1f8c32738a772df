//! SYN-ACK reply collector.
//!
//! Reads raw IPv4 packets from the receive socket and classifies each one by
//! header fields alone. A packet is attributed to the scan iff it carries
//! both SYN and ACK, its TCP source port is the probed port and its TCP
//! destination port is the scan's source port. The acknowledgment number is
//! not checked against the probe's sequence number: any host replying on the
//! right port pair counts, including duplicate or unsolicited SYN-ACKs.
//!
//! RSTs (closed ports), ICMP errors and silence are all treated alike: the
//! target simply does not appear in the results.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use super::forge::{TCP_FLAG_ACK, TCP_FLAG_SYN};
use super::results::ResultsSink;
use super::syn_sender::ScanError;
use super::transport::PacketRecv;
use crate::engine::{ScanCounters, StopSignal};
use crate::ScanConfig;

/// Receive buffer size; large enough for any IPv4 packet.
pub const RECV_BUFFER_SIZE: usize = 65536;

/// TCP header bytes needed for classification: ports, seq, ack, offset, flags.
const TCP_CLASSIFY_LEN: usize = 14;

/// Outcome of classifying one received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// SYN-ACK on the scan's port pair from the given peer.
    Open(Ipv4Addr),
    /// Well-formed but not a reply to this scan.
    Unmatched,
    /// Too short, or header lengths inconsistent with the packet size.
    Malformed,
}

/// Classify a raw IPv4 packet against the scan's port pair.
pub fn classify_reply(packet: &[u8], scan_src_port: u16, scan_dst_port: u16) -> ReplyClass {
    if packet.len() < 20 {
        return ReplyClass::Malformed;
    }
    let ihl = (packet[0] & 0x0F) as usize * 4;
    if ihl < 20 || packet.len() < ihl + TCP_CLASSIFY_LEN {
        return ReplyClass::Malformed;
    }

    let tcp = &packet[ihl..];
    let src_port = u16::from_be_bytes([tcp[0], tcp[1]]);
    let dst_port = u16::from_be_bytes([tcp[2], tcp[3]]);
    let flags = tcp[13];

    let syn_ack = flags & TCP_FLAG_SYN != 0 && flags & TCP_FLAG_ACK != 0;
    if syn_ack && src_port == scan_dst_port && dst_port == scan_src_port {
        ReplyClass::Open(Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]))
    } else {
        ReplyClass::Unmatched
    }
}

/// Counters kept by one collector run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Packets read from the socket.
    pub packets: u64,
    /// Packets attributed to the scan.
    pub matched: u64,
    /// Packets too short or inconsistent to parse.
    pub malformed: u64,
}

/// Receive-side half of a scan.
#[derive(Debug, Clone)]
pub struct ReplyCollector {
    source_port: u16,
    dest_port: u16,
    drain_window: Duration,
}

impl ReplyCollector {
    /// Collector matching replies to `config`'s port pair.
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            source_port: config.source_port,
            dest_port: config.dest_port,
            drain_window: config.drain_window,
        }
    }

    /// Classify one packet against this scan.
    pub fn classify(&self, packet: &[u8]) -> ReplyClass {
        classify_reply(packet, self.source_port, self.dest_port)
    }

    /// Read and classify packets until the stop signal ends collection.
    ///
    /// Each match increments the received and since-last-report counters
    /// and is recorded in `sink`. After `stop` is raised, collection goes on
    /// while packets keep arriving, for at most the drain window; the first
    /// read timeout after that ends it.
    ///
    /// # Errors
    /// A socket read failure (`ScanError::Recv`) or a closed results sink
    /// (`ScanError::Results`) ends collection; matches recorded so far stand.
    pub fn run(
        &self,
        rx: &mut dyn PacketRecv,
        stop: &StopSignal,
        counters: &ScanCounters,
        sink: &ResultsSink,
    ) -> Result<CollectorStats, ScanError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut stats = CollectorStats::default();
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if stop.is_set() {
                let deadline =
                    *drain_deadline.get_or_insert_with(|| Instant::now() + self.drain_window);
                if Instant::now() >= deadline {
                    tracing::debug!("drain window elapsed");
                    break;
                }
            }

            let len = match rx.recv_raw(&mut buf)? {
                Some(len) => len,
                None if stop.is_set() => break,
                None => continue,
            };
            stats.packets += 1;

            match self.classify(&buf[..len]) {
                ReplyClass::Open(peer) => {
                    stats.matched += 1;
                    counters.record_match();
                    tracing::debug!(peer = %peer, port = self.dest_port, "SYN-ACK received");
                    sink.record(peer)?;
                }
                ReplyClass::Unmatched => {}
                ReplyClass::Malformed => stats.malformed += 1,
            }
        }

        tracing::info!(
            packets = stats.packets,
            matched = stats.matched,
            malformed = stats.malformed,
            "collector stopped"
        );
        Ok(stats)
    }
}

// =============================================================================
// Tests
// =============================================================================
