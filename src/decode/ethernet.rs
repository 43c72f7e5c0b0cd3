//! Ethernet header parsing

use anyhow::{bail, Result};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Minimum Ethernet frame size (without preamble/FCS)
pub const MIN_FRAME_SIZE: usize = 14;

/// Parse an Ethernet header, returning the ethertype and the payload offset
pub fn parse_ethernet(data: &[u8]) -> Result<(u16, usize)> {
    if data.len() < MIN_FRAME_SIZE {
        bail!("Frame too short: {} bytes (minimum {})", data.len(), MIN_FRAME_SIZE);
    }

    let ethertype = u16::from_be_bytes([data[12], data[13]]);

    Ok((ethertype, MIN_FRAME_SIZE))
}
