//! Raw IPv4 sockets for the scan's two data paths.
//!
//! Send: `SOCK_RAW / IPPROTO_TCP` with `IP_HDRINCL` set, so the kernel takes
//! the forged IPv4 header verbatim (filling in the IP header checksum, which
//! the template leaves at zero).
//!
//! Receive: `SOCK_RAW / IPPROTO_TCP` delivers a copy of every inbound TCP
//! segment with its IPv4 header. A receive timeout bounds every read so the
//! collector can re-check the stop flag.
//!
//! Both require `CAP_NET_RAW`.

use std::any::Any;
use std::io;
use std::time::Duration;

use crate::scanner::syn_sender::ScanError;
use crate::scanner::transport::{PacketRecv, PacketSend};

/// Sends complete IPv4 packets via `IP_HDRINCL`.
pub struct RawSocketSender {
    fd: i32,
}

// SAFETY: RawSocketSender owns a single file descriptor; no interior mutability.
unsafe impl Send for RawSocketSender {}

impl RawSocketSender {
    /// Open the send socket.
    ///
    /// # Errors
    /// `ScanError::RawSocket` if `socket()` fails (typically missing
    /// `CAP_NET_RAW`), `ScanError::SocketOption` if `IP_HDRINCL` cannot be set.
    pub fn new() -> Result<Self, ScanError> {
        let fd = open_tcp_raw()?;
        let one: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_HDRINCL,
                &one as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ScanError::SocketOption(format!("IP_HDRINCL: {err}")));
        }
        tracing::debug!(fd, "raw send socket opened");
        Ok(Self { fd })
    }
}

impl Drop for RawSocketSender {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}

impl PacketSend for RawSocketSender {
    /// The destination is taken from IPv4 header bytes 16–19.
    fn send_raw(&mut self, packet: &[u8]) -> Result<(), ScanError> {
        if packet.len() < 20 {
            return Err(ScanError::Send(format!(
                "packet too short for IPv4 header: {} bytes (need >= 20)",
                packet.len()
            )));
        }

        // sin_addr is in network byte order in memory; from_ne_bytes keeps
        // the header bytes in place.
        let dst_addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes([packet[16], packet[17], packet[18], packet[19]]),
            },
            sin_zero: [0; 8],
        };

        let ret = unsafe {
            libc::sendto(
                self.fd,
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
                0,
                &dst_addr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };

        if ret < 0 {
            return Err(ScanError::Send(format!(
                "raw socket sendto failed: {}",
                io::Error::last_os_error()
            )));
        }

        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Receives inbound TCP segments, IPv4 header included.
pub struct RawSocketReceiver {
    fd: i32,
}

// SAFETY: RawSocketReceiver owns a single file descriptor; no interior mutability.
unsafe impl Send for RawSocketReceiver {}

impl RawSocketReceiver {
    /// Open the receive socket with a per-read timeout.
    ///
    /// A zero timeout would make reads block forever, so it is raised to 1 ms.
    pub fn new(timeout: Duration) -> Result<Self, ScanError> {
        let fd = open_tcp_raw()?;
        let timeout = timeout.max(Duration::from_millis(1));
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ScanError::SocketOption(format!("SO_RCVTIMEO: {err}")));
        }
        tracing::debug!(fd, timeout_ms = timeout.as_millis() as u64, "raw receive socket opened");
        Ok(Self { fd })
    }
}

impl Drop for RawSocketReceiver {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}

impl PacketRecv for RawSocketReceiver {
    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<Option<usize>, ScanError> {
        let ret = unsafe {
            libc::recv(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if ret >= 0 {
            return Ok(Some(ret as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                Ok(None)
            }
            _ => Err(ScanError::Recv(format!("raw socket recv failed: {err}"))),
        }
    }
}

fn open_tcp_raw() -> Result<i32, ScanError> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_TCP) };
    if fd < 0 {
        return Err(ScanError::RawSocket(format!(
            "SOCK_RAW/IPPROTO_TCP socket creation failed: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(fd)
}

// =============================================================================
// Tests
// =============================================================================
