//! AF_PACKET raw socket
//!
//! Binds a link-layer socket to all Ethernet types and exposes blocking
//! reads that carry the kernel's packet-type (host-bound vs host-sent)
//! alongside the frame bytes. Requires CAP_NET_RAW.

use anyhow::{bail, Context, Result};
use std::io;
use std::time::Duration;

// Packet types from linux/if_packet.h
const PACKET_HOST: u8 = 0;
const PACKET_OUTGOING: u8 = 4;

/// Link-layer packet type, from `sockaddr_ll.sll_pkttype`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Addressed to this host (PACKET_HOST)
    Host,
    /// Sent by this host (PACKET_OUTGOING)
    Outgoing,
    /// Broadcast, multicast, or promiscuous capture of another host's traffic
    Other,
}

impl PacketType {
    fn from_sll(pkttype: u8) -> Self {
        match pkttype {
            PACKET_HOST => PacketType::Host,
            PACKET_OUTGOING => PacketType::Outgoing,
            _ => PacketType::Other,
        }
    }
}

/// Raw link-layer socket bound to all Ethernet types
pub struct RawSocket {
    fd: libc::c_int,
}

impl RawSocket {
    /// Open the socket. Fails without CAP_NET_RAW; the error is fatal to
    /// the caller.
    pub fn open(recv_timeout: Duration) -> Result<Self> {
        // socket(2) expects the ethertype filter in network byte order
        let protocol = (libc::ETH_P_ALL as u16).to_be() as libc::c_int;

        // SAFETY: plain socket(2) call; the fd is owned by RawSocket and
        // closed in Drop.
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol) };
        if fd < 0 {
            return Err(io::Error::last_os_error())
                .context("Failed to open AF_PACKET socket (CAP_NET_RAW required)");
        }

        let socket = Self { fd };
        socket.set_recv_timeout(recv_timeout)?;
        Ok(socket)
    }

    /// Set SO_RCVTIMEO so the read loop can observe a stop flag
    fn set_recv_timeout(&self, timeout: Duration) -> Result<()> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };

        // SAFETY: tv is a valid timeval for the duration of the call.
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };

        if rc != 0 {
            bail!("Failed to set SO_RCVTIMEO: {}", io::Error::last_os_error());
        }

        Ok(())
    }

    /// Receive one frame into `buf`. Returns the frame length and the
    /// link-layer packet type, or `Ok(None)` on receive timeout.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, PacketType)>> {
        // SAFETY: addr is zero-initialized sockaddr_ll storage and addr_len
        // matches its size; the kernel writes at most addr_len bytes.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        let mut addr_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

        let n = unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut addr_len,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Ok(None),
                _ => Err(err),
            };
        }

        Ok(Some((n as usize, PacketType::from_sll(addr.sll_pkttype))))
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        // SAFETY: fd is a valid socket owned by this struct.
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_mapping() {
        assert_eq!(PacketType::from_sll(0), PacketType::Host);
        assert_eq!(PacketType::from_sll(4), PacketType::Outgoing);
        // Broadcast (1) and other-host (3) are not attributable to a direction
        assert_eq!(PacketType::from_sll(1), PacketType::Other);
        assert_eq!(PacketType::from_sll(3), PacketType::Other);
    }
}
