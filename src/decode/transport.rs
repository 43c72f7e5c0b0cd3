//! Transport layer (TCP/UDP/ICMP) parsing

use anyhow::{bail, Result};

use crate::capture::packet::{L4Header, TcpFlags};
use super::ipv4::protocol;

/// Parse the transport header for the given IP protocol.
///
/// Returns `Ok(None)` for protocols the pipeline does not track.
pub fn parse_transport(ip_protocol: u8, data: &[u8]) -> Result<Option<L4Header>> {
    match ip_protocol {
        protocol::TCP => parse_tcp(data).map(Some),
        protocol::UDP => parse_udp(data).map(Some),
        protocol::ICMP => parse_icmp(data).map(Some),
        _ => Ok(None),
    }
}

/// Parse a TCP header
///
/// TCP header format:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Source Port          |       Destination Port        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Acknowledgment Number                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Data |           |U|A|P|R|S|F|                               |
/// | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
/// |       |           |G|K|H|T|N|N|                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
fn parse_tcp(data: &[u8]) -> Result<L4Header> {
    if data.len() < 14 {
        bail!("Data too short for TCP header: {} bytes (minimum 14)", data.len());
    }

    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let flags = TcpFlags::from_byte(data[13]);

    Ok(L4Header::Tcp { src_port, dst_port, flags })
}

/// Parse a UDP header
///
/// UDP header format:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Source Port          |       Destination Port        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            Length             |           Checksum            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
fn parse_udp(data: &[u8]) -> Result<L4Header> {
    if data.len() < 8 {
        bail!("Data too short for UDP header: {} bytes (minimum 8)", data.len());
    }

    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let length = u16::from_be_bytes([data[4], data[5]]);

    Ok(L4Header::Udp { src_port, dst_port, length })
}

/// Parse an ICMP header (type and code only)
fn parse_icmp(data: &[u8]) -> Result<L4Header> {
    if data.len() < 2 {
        bail!("Data too short for ICMP header: {} bytes (minimum 2)", data.len());
    }

    Ok(L4Header::Icmp { msg_type: data[0], code: data[1] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_header() {
        // src=443, dst=54321, SYN flag
        let data = vec![
            0x01, 0xbb,             // Source port: 443
            0xd4, 0x31,             // Destination port: 54321
            0x00, 0x00, 0x00, 0x01, // Sequence number
            0x00, 0x00, 0x00, 0x00, // Ack number
            0x50, 0x02,             // Data offset, Flags (SYN)
        ];

        let l4 = parse_transport(protocol::TCP, &data).unwrap().unwrap();

        match l4 {
            L4Header::Tcp { src_port, dst_port, flags } => {
                assert_eq!(src_port, 443);
                assert_eq!(dst_port, 54321);
                assert!(flags.syn);
                assert!(!flags.ack);
            }
            other => panic!("expected TCP header, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_udp_header() {
        // src=53, dst=12345, length=100
        let data = vec![
            0x00, 0x35,             // Source port: 53
            0x30, 0x39,             // Destination port: 12345
            0x00, 0x64,             // Length: 100
            0x00, 0x00,             // Checksum
        ];

        let l4 = parse_transport(protocol::UDP, &data).unwrap().unwrap();

        match l4 {
            L4Header::Udp { src_port, dst_port, length } => {
                assert_eq!(src_port, 53);
                assert_eq!(dst_port, 12345);
                assert_eq!(length, 100);
            }
            other => panic!("expected UDP header, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_icmp_header() {
        // Echo request
        let data = vec![0x08, 0x00, 0x12, 0x34];

        let l4 = parse_transport(protocol::ICMP, &data).unwrap().unwrap();

        match l4 {
            L4Header::Icmp { msg_type, code } => {
                assert_eq!(msg_type, 8);
                assert_eq!(code, 0);
            }
            other => panic!("expected ICMP header, got {:?}", other),
        }
    }

    #[test]
    fn test_untracked_protocol() {
        assert!(parse_transport(protocol::IGMP, &[0u8; 8]).unwrap().is_none());
        assert!(parse_transport(47, &[0u8; 8]).unwrap().is_none());
    }

    #[test]
    fn test_truncated_tcp() {
        assert!(parse_transport(protocol::TCP, &[0u8; 10]).is_err());
    }
}
