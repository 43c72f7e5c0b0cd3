//! Network interface helpers

use anyhow::{Context, Result};
use pnet::datalink;
use std::net::{Ipv4Addr, UdpSocket};

/// Discover the host's primary IPv4 address.
///
/// Opens a UDP socket towards a public address and reads the local address
/// the kernel picked for the route. No traffic is sent.
pub fn primary_local_ip() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .with_context(|| "Failed to bind probe socket")?;

    socket.connect("8.8.8.8:80")
        .with_context(|| "Failed to route probe socket")?;

    let addr = socket.local_addr()
        .with_context(|| "Failed to read probe socket address")?;

    match addr.ip() {
        std::net::IpAddr::V4(ip) => Ok(ip),
        std::net::IpAddr::V6(ip) => anyhow::bail!("Primary address is IPv6 ({}), expected IPv4", ip),
    }
}

/// Print information about all interfaces
pub fn print_interfaces() {
    println!("Available network interfaces:");
    println!("{:-<60}", "");

    for iface in datalink::interfaces() {
        let mac_str = iface
            .mac
            .map(|m| m.to_string())
            .unwrap_or_else(|| "N/A".to_string());

        let status = if iface.is_up() { "UP" } else { "DOWN" };
        let loopback = if iface.is_loopback() { " (loopback)" } else { "" };

        println!("{}: {} [{}{}]", iface.name, mac_str, status, loopback);

        for ip in &iface.ips {
            println!("    {}", ip.ip());
        }
    }
}
