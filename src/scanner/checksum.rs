//! Internet checksum (RFC 1071) and incremental update (RFC 1624).
//!
//! The full checksum runs once per scan, when the SYN template is built.
//! Every probe after that patches the stored TCP checksum in O(1) with
//! [`update_checksum_u32`] instead of re-summing the pseudo-header and
//! TCP header.
//!
//! Byte-order convention: buffers hold network-order words, checksums are
//! returned as host `u16` values to be written back with `to_be_bytes()`,
//! and 32-bit field values passed to the update are host-order
//! (`u32::from_be_bytes` of the stored bytes).

use std::net::Ipv4Addr;

/// IPv4 protocol number for TCP.
pub const IPPROTO_TCP: u8 = 6;

/// Fold a 32-bit accumulator into 16 bits with end-around carry.
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Add each big-endian 16-bit word of `data` into `sum`.
///
/// An odd trailing byte is the high byte of a zero-padded word.
fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        // Keep the accumulator from overflowing on very large buffers.
        if sum > 0xFFFF_0000 {
            sum = fold(sum) as u32;
        }
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

/// Compute the Internet checksum of `buffer`.
///
/// Sums 16-bit words in ones'-complement arithmetic and returns the
/// complement of the folded sum.
pub fn checksum(buffer: &[u8]) -> u16 {
    !fold(sum_words(buffer, 0))
}

/// Patch a checksum after a 32-bit field covered by it changes.
///
/// `current` is the checksum computed over a buffer in which the field
/// held `old`; the result is the checksum the same buffer has with the
/// field holding `new`. Implements `HC' = ~(~HC + ~m + m')` over both
/// 16-bit halves of the field.
pub fn update_checksum_u32(current: u16, old: u32, new: u32) -> u16 {
    let old = !old;
    let mut sum = (!current) as u32;
    sum += (old >> 16) + (old & 0xFFFF);
    sum += (new >> 16) + (new & 0xFFFF);
    !fold(sum)
}

/// Compute the TCP checksum of `tcp_segment` including the IPv4 pseudo-header.
///
/// The checksum field (bytes 16–17 of the segment) is treated as zero
/// whatever it currently holds.
pub fn tcp_checksum(tcp_segment: &[u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> u16 {
    // IPv4 pseudo-header: src(4) + dst(4) + zero(1) + proto(1) + tcp_len(2)
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src_ip.octets());
    pseudo[4..8].copy_from_slice(&dst_ip.octets());
    pseudo[9] = IPPROTO_TCP;
    pseudo[10..12].copy_from_slice(&(tcp_segment.len() as u16).to_be_bytes());

    let mut sum = sum_words(&pseudo, 0);
    if tcp_segment.len() >= 18 {
        sum = sum_words(&tcp_segment[..16], sum);
        sum = sum_words(&tcp_segment[18..], sum);
    } else {
        sum = sum_words(tcp_segment, sum);
    }
    !fold(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Write `value` big-endian at `offset` and return the previous value.
    fn put_u32(buf: &mut [u8], offset: usize, value: u32) -> u32 {
        let old = u32::from_be_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]);
        buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        old
    }

    fn sample_buffer() -> Vec<u8> {
        (0u8..40).map(|b| b.wrapping_mul(37).wrapping_add(11)).collect()
    }

    #[test]
    fn test_checksum_even_bytes() {
        // 0x0001 + 0x0002 = 0x0003 → ~0x0003 = 0xFFFC
        assert_eq!(checksum(&[0x00, 0x01, 0x00, 0x02]), 0xFFFC);
    }

    #[test]
    fn test_checksum_with_carry() {
        // 0xFFFF + 0x0001 = 0x10000 → fold → 0x0001 → ~0x0001 = 0xFFFE
        assert_eq!(checksum(&[0xFF, 0xFF, 0x00, 0x01]), 0xFFFE);
    }

    #[test]
    fn test_checksum_odd_length_pads_high_byte() {
        // Trailing 0xAB is treated as the word 0xAB00.
        assert_eq!(checksum(&[0x12, 0x34, 0xAB]), !(0x1234u16 + 0xAB00));
        assert_eq!(checksum(&[0xAB]), checksum(&[0xAB, 0x00]));
    }

    #[test]
    fn test_checksum_rfc1071_example() {
        // RFC 1071 §3 worked example: sum = 0xDDF2, checksum = ~0xDDF2.
        let data = [0x00, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7];
        assert_eq!(checksum(&data), !0xDDF2u16);
    }

    #[test]
    fn test_checksum_self_verifies() {
        for len in [2usize, 20, 40, 64, 1500] {
            let mut buf: Vec<u8> = (0..len).map(|i| (i * 131 % 251) as u8).collect();
            buf[0] = 0;
            buf[1] = 0;
            let cks = checksum(&buf);
            buf[0..2].copy_from_slice(&cks.to_be_bytes());
            assert_eq!(
                checksum(&buf),
                0,
                "buffer of {len} bytes with its checksum stored must verify to zero"
            );
        }
    }

    #[test]
    fn test_checksum_large_buffer_does_not_overflow() {
        let buf = vec![0xFFu8; 65536];
        // All-ones words fold to 0xFFFF, complement is zero.
        assert_eq!(checksum(&buf), 0);
    }

    #[test]
    fn test_update_matches_recompute_for_edge_values() {
        let values = [
            0x0000_0000u32,
            0xFFFF_FFFF,
            0x0000_FFFF,
            0xFFFF_0000,
            0x0A00_0003,
            0xDEAD_BEEF,
            0x8000_0001,
        ];
        for &old in &values {
            for &new in &values {
                let mut buf = sample_buffer();
                put_u32(&mut buf, 12, old);
                let before = checksum(&buf);
                put_u32(&mut buf, 12, new);
                assert_eq!(
                    update_checksum_u32(before, old, new),
                    checksum(&buf),
                    "incremental update {old:#010x} -> {new:#010x} must match recompute"
                );
            }
        }
    }

    #[test]
    fn test_update_sequence_matches_recompute() {
        let mut buf = sample_buffer();
        let mut cks = checksum(&buf);
        let mut state: u32 = 0x1234_5678;
        for step in 0..1000u32 {
            // xorshift keeps the sequence deterministic
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let offset = [4usize, 16, 24][(step % 3) as usize];
            let old = put_u32(&mut buf, offset, state);
            cks = update_checksum_u32(cks, old, state);
        }
        assert_eq!(cks, checksum(&buf));
    }

    #[test]
    fn test_update_same_value_is_identity() {
        let buf = sample_buffer();
        let cks = checksum(&buf);
        assert_eq!(update_checksum_u32(cks, 0xCAFE_BABE, 0xCAFE_BABE), cks);
    }

    #[test]
    fn test_tcp_checksum_ignores_checksum_field() {
        let src = Ipv4Addr::new(192, 168, 1, 100);
        let dst = Ipv4Addr::new(10, 0, 0, 1);
        let mut seg = [0u8; 20];
        seg[0..2].copy_from_slice(&50000u16.to_be_bytes());
        seg[2..4].copy_from_slice(&80u16.to_be_bytes());
        seg[12] = 0x50;
        seg[13] = 0x02;
        let a = tcp_checksum(&seg, src, dst);
        seg[16] = 0xAB;
        seg[17] = 0xCD;
        assert_eq!(tcp_checksum(&seg, src, dst), a);
    }

    #[test]
    fn test_tcp_checksum_verifies_with_pseudo_header() {
        let src = Ipv4Addr::new(192, 168, 1, 100);
        let dst = Ipv4Addr::new(10, 0, 0, 1);
        let mut seg = [0u8; 20];
        seg[0..2].copy_from_slice(&50000u16.to_be_bytes());
        seg[2..4].copy_from_slice(&443u16.to_be_bytes());
        seg[4..8].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        seg[12] = 0x50;
        seg[13] = 0x02;
        let cks = tcp_checksum(&seg, src, dst);
        seg[16..18].copy_from_slice(&cks.to_be_bytes());

        let mut whole = Vec::new();
        whole.extend_from_slice(&src.octets());
        whole.extend_from_slice(&dst.octets());
        whole.extend_from_slice(&[0, IPPROTO_TCP, 0, 20]);
        whole.extend_from_slice(&seg);
        assert_eq!(checksum(&whole), 0, "pseudo-header + segment must verify");
    }
}
