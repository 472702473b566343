//! Networking helpers for proxy detection.
//!
//! This library provides the pure, I/O-free parts of probing:
//! - Built-in list of well-known proxy ports
//! - Port list parsing for configuration overrides
//! - DNSBL query name construction for the Tor exit list
//! - Interpretation of DNSBL answers

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use thiserror::Error;

/// Networking errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid port value.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Address family not supported by the exit list.
    #[error("exit list lookups only support IPv4, got {0}")]
    UnsupportedFamily(IpAddr),

    /// Invalid DNS zone.
    #[error("invalid DNS zone: {0}")]
    InvalidZone(String),
}

// ============================================================================
// Ports
// ============================================================================

/// Ports commonly exposed by open HTTP/SOCKS proxies and Tor clients.
pub const DEFAULT_PROXY_PORTS: &[u16] = &[
    1080, 1081, 3128, 3129, 4145, 6588, 8000, 8080, 8081, 8118, 8888, 9050, 9150,
];

/// Default bound for a single TCP connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Parse a comma-separated port list (e.g. `"8080, 3128,1080"`).
///
/// Empty segments are ignored, duplicates are removed while keeping the first
/// occurrence. Port 0 is rejected.
pub fn parse_port_list(s: &str) -> Result<Vec<u16>, NetworkError> {
    let mut ports = Vec::new();

    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let port: u16 = part
            .parse()
            .map_err(|_| NetworkError::InvalidPort(part.to_string()))?;
        if port == 0 {
            return Err(NetworkError::InvalidPort(part.to_string()));
        }
        if !ports.contains(&port) {
            ports.push(port);
        }
    }

    if ports.is_empty() {
        return Err(NetworkError::InvalidPort(format!(
            "no ports in list {:?}",
            s
        )));
    }

    Ok(ports)
}

// ============================================================================
// Tor exit list (DNSBL)
// ============================================================================

/// DNS zone of the public Tor exit list.
pub const DEFAULT_EXIT_LIST_ZONE: &str = "dnsel.torproject.org";

/// Answers meaning "listed" under the DNSBL convention.
pub const EXIT_LIST_SENTINELS: [Ipv4Addr; 2] =
    [Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(127, 0, 0, 2)];

/// Validate a DNS zone name (non-empty labels, no leading/trailing dot).
pub fn validate_zone(zone: &str) -> Result<&str, NetworkError> {
    let trimmed = zone.trim().trim_end_matches('.');
    let valid = !trimmed.is_empty()
        && trimmed.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    if valid {
        Ok(trimmed)
    } else {
        Err(NetworkError::InvalidZone(zone.to_string()))
    }
}

/// Reverse the octets of an IPv4 address: `1.2.3.4` -> `4.3.2.1`.
pub fn reverse_octets(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{d}.{c}.{b}.{a}")
}

/// Build the DNSBL query name for `ip` under `zone`.
pub fn exit_list_query_name(ip: IpAddr, zone: &str) -> Result<String, NetworkError> {
    match ip {
        IpAddr::V4(v4) => Ok(format!("{}.{}", reverse_octets(v4), zone)),
        IpAddr::V6(_) => Err(NetworkError::UnsupportedFamily(ip)),
    }
}

/// Returns true if a DNSBL answer marks the queried address as listed.
pub fn is_exit_sentinel(answer: IpAddr) -> bool {
    match answer {
        IpAddr::V4(v4) => EXIT_LIST_SENTINELS.contains(&v4),
        IpAddr::V6(_) => false,
    }
}

/// Parse an address as supplied by a caller.
pub fn parse_ip(s: &str) -> Result<IpAddr, NetworkError> {
    s.trim()
        .parse()
        .map_err(|_| NetworkError::InvalidAddress(s.to_string()))
}
