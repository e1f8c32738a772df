//! Packet I/O abstraction for the sweep and the reply collector.
//!
//! The scan needs exactly two capabilities: push a complete IPv4 packet out
//! (header included) and pull raw IPv4 packets in. Both sit behind traits so
//! the sender loop and the collector run unchanged against the real raw
//! sockets (`raw_socket.rs`) or the in-memory mocks below.

use std::any::Any;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::scanner::forge::{IP_HEADER_LEN, TCP_FLAG_ACK, TCP_FLAG_SYN, TCP_HEADER_LEN};
use crate::scanner::syn_sender::ScanError;

/// Outgoing half: transmits forged packets.
pub trait PacketSend: Send {
    /// Transmit one complete IPv4 packet.
    ///
    /// The destination is read from the packet's IP header.
    fn send_raw(&mut self, packet: &[u8]) -> Result<(), ScanError>;

    /// Return `self` as `&dyn Any` to enable safe downcasting in tests.
    fn as_any(&self) -> &dyn Any;
}

/// Incoming half: yields raw IPv4 packets.
pub trait PacketRecv: Send {
    /// Read one packet into `buf`.
    ///
    /// Returns `Ok(Some(len))` for a packet, `Ok(None)` when the read timed
    /// out with nothing to deliver.
    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<Option<usize>, ScanError>;
}

/// Callback turning an outgoing probe into an optional reply.
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

type PacketQueue = Arc<Mutex<VecDeque<Vec<u8>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Mock sender
// =============================================================================

/// In-memory sender. Records every packet and can simulate responders.
pub struct MockSender {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    responder: Option<(Responder, PacketQueue)>,
    /// Fail every send once this many packets have gone out.
    pub fail_after: Option<usize>,
}

impl MockSender {
    /// Create a sender that only records packets.
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            responder: None,
            fail_after: None,
        }
    }

    /// Number of packets sent so far.
    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Shared handle on the sent-packet log, usable after the sender moved.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.sent.clone()
    }
}

impl Default for MockSender {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSend for MockSender {
    fn send_raw(&mut self, packet: &[u8]) -> Result<(), ScanError> {
        let mut sent = lock(&self.sent);
        if let Some(limit) = self.fail_after {
            if sent.len() >= limit {
                return Err(ScanError::Send("mock send failure".into()));
            }
        }
        sent.push(packet.to_vec());
        drop(sent);

        if let Some((responder, queue)) = self.responder.as_mut() {
            if let Some(reply) = responder(packet) {
                lock(queue).push_back(reply);
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Mock receiver
// =============================================================================

/// In-memory receiver fed by [`MockReceiver::queue_packet`] or a linked
/// [`MockSender`] responder.
pub struct MockReceiver {
    queue: PacketQueue,
    idle: Duration,
    /// Fail the read after this many packets have been delivered.
    pub fail_after: Option<usize>,
    delivered: usize,
}

impl MockReceiver {
    /// Create an empty receiver. An empty queue reads as a 1 ms timeout.
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            idle: Duration::from_millis(1),
            fail_after: None,
            delivered: 0,
        }
    }

    /// Queue a packet for a later `recv_raw`.
    pub fn queue_packet(&self, packet: Vec<u8>) {
        lock(&self.queue).push_back(packet);
    }

    /// Packets still waiting to be read.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }
}

impl Default for MockReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRecv for MockReceiver {
    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<Option<usize>, ScanError> {
        if let Some(limit) = self.fail_after {
            if self.delivered >= limit {
                return Err(ScanError::Recv("mock receive failure".into()));
            }
        }
        let next = lock(&self.queue).pop_front();
        match next {
            Some(packet) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                self.delivered += 1;
                Ok(Some(len))
            }
            None => {
                std::thread::sleep(self.idle);
                Ok(None)
            }
        }
    }
}

/// Create a sender/receiver pair where every probe is passed to `responder`
/// and any reply it returns shows up on the receiver.
pub fn mock_link(responder: Responder) -> (MockSender, MockReceiver) {
    let receiver = MockReceiver::new();
    let mut sender = MockSender::new();
    sender.responder = Some((responder, receiver.queue.clone()));
    (sender, receiver)
}

/// Build the reply a host would send to `probe` with the given TCP flags.
///
/// Addresses and ports are swapped and the acknowledgment number is the
/// probe's sequence number plus one. Returns `None` if `probe` is shorter
/// than an IP + TCP header.
pub fn synthesize_reply(probe: &[u8], flags: u8) -> Option<Vec<u8>> {
    if probe.len() < IP_HEADER_LEN + TCP_HEADER_LEN {
        return None;
    }
    let mut reply = probe[..IP_HEADER_LEN + TCP_HEADER_LEN].to_vec();
    reply[12..16].copy_from_slice(&probe[16..20]);
    reply[16..20].copy_from_slice(&probe[12..16]);

    let tcp = IP_HEADER_LEN;
    reply[tcp..tcp + 2].copy_from_slice(&probe[tcp + 2..tcp + 4]);
    reply[tcp + 2..tcp + 4].copy_from_slice(&probe[tcp..tcp + 2]);
    let seq = u32::from_be_bytes([probe[tcp + 4], probe[tcp + 5], probe[tcp + 6], probe[tcp + 7]]);
    reply[tcp + 4..tcp + 8].copy_from_slice(&0x5EED_0000u32.to_be_bytes());
    reply[tcp + 8..tcp + 12].copy_from_slice(&seq.wrapping_add(1).to_be_bytes());
    reply[tcp + 13] = flags;
    reply[tcp + 14..tcp + 16].copy_from_slice(&64240u16.to_be_bytes());
    Some(reply)
}

/// Responder that answers SYN-ACK for the listed hosts and stays silent
/// for every other target.
pub fn open_hosts_responder(open: Vec<Ipv4Addr>) -> Responder {
    Box::new(move |probe: &[u8]| {
        if probe.len() < IP_HEADER_LEN {
            return None;
        }
        let dst = Ipv4Addr::new(probe[16], probe[17], probe[18], probe[19]);
        if open.contains(&dst) {
            synthesize_reply(probe, TCP_FLAG_SYN | TCP_FLAG_ACK)
        } else {
            None
        }
    })
}

// =============================================================================
// Tests
// =============================================================================
