//! Socket tables from `/proc/net/{tcp,tcp6,udp,udp6}`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::types::{ConnState, ConnectionSample, Protocol};

const TABLES: [(&str, Protocol); 4] = [
    ("/proc/net/tcp", Protocol::Tcp),
    ("/proc/net/tcp6", Protocol::Tcp),
    ("/proc/net/udp", Protocol::Udp),
    ("/proc/net/udp6", Protocol::Udp),
];

/// Every socket currently listed by the kernel. Missing tables (no IPv6, non-Linux) are skipped.
pub fn read_connections() -> Vec<ConnectionSample> {
    let mut out = Vec::new();
    for (path, protocol) in TABLES {
        if let Ok(contents) = std::fs::read_to_string(path) {
            out.extend(parse_proc_net(&contents, protocol));
        }
    }
    out
}

/// Parses one table. Malformed lines are skipped.
pub fn parse_proc_net(contents: &str, protocol: Protocol) -> Vec<ConnectionSample> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _slot = fields.next()?;
            let local = parse_endpoint(fields.next()?)?;
            let remote = parse_endpoint(fields.next()?)?;
            let state = u8::from_str_radix(fields.next()?, 16).ok()?;
            Some(ConnectionSample {
                protocol,
                local,
                remote,
                state: conn_state(state),
            })
        })
        .collect()
}

fn conn_state(code: u8) -> ConnState {
    match code {
        0x01 => ConnState::Established,
        0x06 => ConnState::TimeWait,
        0x08 => ConnState::CloseWait,
        0x0A => ConnState::Listen,
        _ => ConnState::Other,
    }
}

// "0100007F:1F90": address words in host byte order, port in network order.
fn parse_endpoint(raw: &str) -> Option<SocketAddr> {
    let (addr, port) = raw.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match addr.len() {
        8 => IpAddr::V4(Ipv4Addr::from(word(addr)?)),
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                chunk.copy_from_slice(&word(addr.get(i * 8..i * 8 + 8)?)?);
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

fn word(hex: &str) -> Option<[u8; 4]> {
    u32::from_str_radix(hex, 16).ok().map(u32::to_ne_bytes)
}
