//! TCP port prober.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use super::{Evidence, MissReason, ProbeOutcome};

/// Bounded TCP connect against a single port.
#[derive(Debug, Clone)]
pub struct PortProber {
    connect_timeout: Duration,
}

impl PortProber {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Attempt a connection to (ip, port).
    ///
    /// An established connection is dropped right away; only the fact that the
    /// port accepted it matters.
    pub async fn probe(&self, ip: IpAddr, port: u16) -> ProbeOutcome {
        let addr = SocketAddr::new(ip, port);

        let outcome = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => ProbeOutcome::Hit(Evidence::OpenPort(port)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                ProbeOutcome::Miss(MissReason::Refused)
            }
            Ok(Err(e)) => ProbeOutcome::Miss(MissReason::Io(e.kind())),
            Err(_) => ProbeOutcome::Miss(MissReason::TimedOut(self.connect_timeout)),
        };

        trace!(%addr, ?outcome, "Port probe finished");
        outcome
    }
}
