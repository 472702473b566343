//! Proxy probes.
//!
//! A probe answers one narrow question about an address:
//! - `port`: does a TCP connect to (ip, port) succeed within the bound?
//! - `exit_node`: does the Tor exit list (DNSBL) list the address?
//!
//! Probe failures are never errors. Every failure collapses into
//! [`ProbeOutcome::Miss`] with a [`MissReason`] kept for logging only.

mod exit_node;
mod mock;
mod port;

pub use exit_node::ExitNodeChecker;
pub use mock::MockProbe;
pub use port::PortProber;

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pxd_networking::{
    parse_port_list, validate_zone, DEFAULT_CONNECT_TIMEOUT, DEFAULT_EXIT_LIST_ZONE,
    DEFAULT_PROXY_PORTS,
};

/// Default bound for an exit-list DNS lookup.
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Why an address was classified as a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// A well-known proxy port accepted a TCP connection.
    OpenPort(u16),
    /// The Tor exit list lists the address.
    TorExitNode,
}

impl Evidence {
    /// Port to persist with the record.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::OpenPort(port) => Some(*port),
            Self::TorExitNode => None,
        }
    }

    /// Human-readable reason to persist with the record.
    pub fn reason(&self) -> String {
        match self {
            Self::OpenPort(port) => format!("Port {port} is open"),
            Self::TorExitNode => "Tor Exit Node".to_string(),
        }
    }
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

/// Why a probe did not find evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// The peer refused the connection.
    Refused,
    /// The bound elapsed.
    TimedOut(Duration),
    /// Any other transport error.
    Io(io::ErrorKind),
    /// The exit list answered with a non-sentinel address.
    NotListed(IpAddr),
    /// The exit list returned no address.
    NoAnswer,
    /// DNS resolution failed (NXDOMAIN included).
    Lookup(String),
    /// The address cannot be checked by this probe.
    Unsupported(String),
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused => write!(f, "connection refused"),
            Self::TimedOut(bound) => write!(f, "timed out after {bound:?}"),
            Self::Io(kind) => write!(f, "transport error: {kind}"),
            Self::NotListed(answer) => write!(f, "not listed (answer {answer})"),
            Self::NoAnswer => write!(f, "no answer"),
            Self::Lookup(e) => write!(f, "lookup failed: {e}"),
            Self::Unsupported(e) => write!(f, "unsupported: {e}"),
        }
    }
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Hit(Evidence),
    Miss(MissReason),
}

impl ProbeOutcome {
    /// Returns true if the probe found evidence.
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Network checks run against a candidate address.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Attempt a TCP connection to (ip, port).
    async fn probe_port(&self, ip: IpAddr, port: u16) -> ProbeOutcome;

    /// Check the Tor exit list for `ip`.
    async fn check_exit_node(&self, ip: IpAddr) -> ProbeOutcome;
}

/// Probe configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Ports probed for every unseen address.
    pub ports: Vec<u16>,

    /// Bound for each TCP connect.
    pub connect_timeout: Duration,

    /// DNSBL zone of the Tor exit list.
    pub exit_list_zone: String,

    /// Bound for each exit-list lookup.
    pub dns_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PROXY_PORTS.to_vec(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            exit_list_zone: DEFAULT_EXIT_LIST_ZONE.to_string(),
            dns_timeout: DEFAULT_DNS_TIMEOUT,
        }
    }
}

impl ProbeConfig {
    /// Load configuration from a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let ports = lookup("PXD_PROBE_PORTS")
            .map(|v| parse_port_list(&v))
            .transpose()
            .context("PXD_PROBE_PORTS must be a comma-separated list of ports.")?
            .unwrap_or(defaults.ports);

        let connect_timeout = lookup("PXD_PROBE_TIMEOUT_MS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("PXD_PROBE_TIMEOUT_MS must be an integer (milliseconds).")?
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or(defaults.connect_timeout);

        let exit_list_zone = lookup("PXD_EXIT_LIST_ZONE")
            .map(|v| validate_zone(&v).map(str::to_string))
            .transpose()
            .context("PXD_EXIT_LIST_ZONE must be a DNS zone name.")?
            .unwrap_or(defaults.exit_list_zone);

        let dns_timeout = lookup("PXD_DNS_TIMEOUT_MS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("PXD_DNS_TIMEOUT_MS must be an integer (milliseconds).")?
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or(defaults.dns_timeout);

        Ok(Self {
            ports,
            connect_timeout,
            exit_list_zone,
            dns_timeout,
        })
    }
}

/// Production probe backed by real sockets and the platform resolver.
pub struct NetworkProbe {
    port: PortProber,
    exit_node: ExitNodeChecker,
}

impl NetworkProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            port: PortProber::new(config.connect_timeout),
            exit_node: ExitNodeChecker::new(config.exit_list_zone.clone(), config.dns_timeout),
        }
    }
}

#[async_trait]
impl Probe for NetworkProbe {
    async fn probe_port(&self, ip: IpAddr, port: u16) -> ProbeOutcome {
        self.port.probe(ip, port).await
    }

    async fn check_exit_node(&self, ip: IpAddr) -> ProbeOutcome {
        self.exit_node.check(ip).await
    }
}
