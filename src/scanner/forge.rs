//! SYN packet template and per-target forge.
//!
//! The template is a 40-byte IPv4 + TCP header pair built once per scan.
//! Only four fields change between probes: IP destination address, TCP
//! sequence number, TCP acknowledgment number and IP identification. The
//! TCP checksum stored in the template always matches the current values
//! of the first three (the destination address reaches the TCP checksum
//! through the pseudo-header); the IP identification is outside it.
//!
//! Sequence and acknowledgment numbers are random per probe. They only make
//! replies harder to forge for a passive observer; the scan never completes
//! a handshake, so they carry no connection state.

use std::net::Ipv4Addr;

use rand::Rng;

use super::checksum::{tcp_checksum, update_checksum_u32, IPPROTO_TCP};
use crate::ScanConfig;

/// IPv4 header length without options.
pub const IP_HEADER_LEN: usize = 20;
/// TCP header length without options.
pub const TCP_HEADER_LEN: usize = 20;
/// Full SYN probe size: IP header + TCP header, no payload.
pub const SYN_PACKET_SIZE: usize = IP_HEADER_LEN + TCP_HEADER_LEN;

/// Initial TTL of every probe.
pub const PROBE_TTL: u8 = 64;

/// TCP flag bits (byte 13 of the TCP header).
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_RST: u8 = 0x04;
pub const TCP_FLAG_ACK: u8 = 0x10;

// Byte offsets within the packet.
const IP_ID_OFFSET: usize = 4;
const IP_SRC_OFFSET: usize = 12;
const IP_DST_OFFSET: usize = 16;
const TCP_SEQ_OFFSET: usize = IP_HEADER_LEN + 4;
const TCP_ACK_OFFSET: usize = IP_HEADER_LEN + 8;
const TCP_CHECKSUM_OFFSET: usize = IP_HEADER_LEN + 16;

/// Mutable SYN packet template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTemplate {
    packet: [u8; SYN_PACKET_SIZE],
    checksum: u16,
}

/// Build the template for `config` and return it with its initial checksum.
///
/// The initial checksum covers the template with destination address,
/// sequence and acknowledgment numbers all zero.
pub fn build_template(config: &ScanConfig) -> (PacketTemplate, u16) {
    let template = PacketTemplate::new(config.source_ip, config.source_port, config.dest_port);
    let checksum = template.checksum();
    (template, checksum)
}

impl PacketTemplate {
    /// Build a template for probes from `src_ip:src_port` to `dst_port`.
    pub fn new(src_ip: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        let mut packet = [0u8; SYN_PACKET_SIZE];

        // --- IPv4 header (bytes 0–19) ---
        packet[0] = 0x45; // Version=4, IHL=5
        packet[2..4].copy_from_slice(&(SYN_PACKET_SIZE as u16).to_be_bytes());
        // bytes 4–5: identification, set per probe
        // bytes 6–7: flags/fragment offset = 0
        packet[8] = PROBE_TTL;
        packet[9] = IPPROTO_TCP;
        // bytes 10–11: header checksum, filled in by the kernel (IP_HDRINCL)
        packet[IP_SRC_OFFSET..IP_SRC_OFFSET + 4].copy_from_slice(&src_ip.octets());
        // bytes 16–19: destination, set per probe

        // --- TCP header (bytes 20–39) ---
        packet[20..22].copy_from_slice(&src_port.to_be_bytes());
        packet[22..24].copy_from_slice(&dst_port.to_be_bytes());
        // seq / ack: set per probe
        packet[32] = ((TCP_HEADER_LEN / 4) as u8) << 4;
        packet[33] = TCP_FLAG_SYN;
        // window, checksum, urgent pointer: zero

        let checksum = tcp_checksum(&packet[IP_HEADER_LEN..], src_ip, Ipv4Addr::UNSPECIFIED);
        packet[TCP_CHECKSUM_OFFSET..TCP_CHECKSUM_OFFSET + 2]
            .copy_from_slice(&checksum.to_be_bytes());

        Self { packet, checksum }
    }

    /// TCP checksum matching the current field values.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Current packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.packet
    }

    /// Current IP destination address.
    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.read_u32(IP_DST_OFFSET))
    }

    /// Current TCP sequence number.
    pub fn sequence(&self) -> u32 {
        self.read_u32(TCP_SEQ_OFFSET)
    }

    /// Current TCP acknowledgment number.
    pub fn acknowledgment(&self) -> u32 {
        self.read_u32(TCP_ACK_OFFSET)
    }

    /// Current IP identification.
    pub fn ip_id(&self) -> u16 {
        u16::from_be_bytes([self.packet[IP_ID_OFFSET], self.packet[IP_ID_OFFSET + 1]])
    }

    /// Forge the probe for `target` with fresh random seq/ack/IP-ID values.
    pub fn prepare_send<R: Rng + ?Sized>(&mut self, target: Ipv4Addr, rng: &mut R) -> &[u8] {
        let seq: u32 = rng.gen();
        let ack: u32 = rng.gen();
        let ip_id: u16 = rng.gen();
        self.prepare_with(target, seq, ack, ip_id)
    }

    /// Forge the probe for `target` with caller-chosen field values.
    ///
    /// Order matters only for the transient state in between: each 32-bit
    /// field has its checksum contribution swapped before it is overwritten.
    pub fn prepare_with(&mut self, target: Ipv4Addr, seq: u32, ack: u32, ip_id: u16) -> &[u8] {
        self.replace_u32(IP_DST_OFFSET, u32::from(target));
        self.replace_u32(TCP_SEQ_OFFSET, seq);
        self.replace_u32(TCP_ACK_OFFSET, ack);
        self.packet[IP_ID_OFFSET..IP_ID_OFFSET + 2].copy_from_slice(&ip_id.to_be_bytes());
        &self.packet
    }

    /// Overwrite a checksummed 32-bit field, patching the TCP checksum.
    fn replace_u32(&mut self, offset: usize, value: u32) {
        let old = self.read_u32(offset);
        self.checksum = update_checksum_u32(self.checksum, old, value);
        self.packet[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        self.packet[TCP_CHECKSUM_OFFSET..TCP_CHECKSUM_OFFSET + 2]
            .copy_from_slice(&self.checksum.to_be_bytes());
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_be_bytes([
            self.packet[offset],
            self.packet[offset + 1],
            self.packet[offset + 2],
            self.packet[offset + 3],
        ])
    }
}

/// Verify that a TCP header has SYN-only flags (SYN=1, ACK=0, RST=0).
#[cfg(test)]
pub(crate) fn verify_syn_flags(tcp_buf: &[u8]) -> bool {
    if tcp_buf.len() < 14 {
        return false;
    }
    let flags = tcp_buf[13];
    flags & TCP_FLAG_SYN != 0 && flags & TCP_FLAG_ACK == 0 && flags & TCP_FLAG_RST == 0
}

// =============================================================================
// Tests
// =============================================================================
