//! Tor exit-list (DNSBL) checker.

use std::net::IpAddr;
use std::time::Duration;

use pxd_networking::{exit_list_query_name, is_exit_sentinel};
use tokio::net::lookup_host;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{Evidence, MissReason, ProbeOutcome};

/// Resolves `<reversed-ip>.<zone>` and interprets the answer.
#[derive(Debug, Clone)]
pub struct ExitNodeChecker {
    zone: String,
    dns_timeout: Duration,
}

impl ExitNodeChecker {
    pub fn new(zone: String, dns_timeout: Duration) -> Self {
        Self { zone, dns_timeout }
    }

    /// Check whether the exit list lists `ip`.
    pub async fn check(&self, ip: IpAddr) -> ProbeOutcome {
        let name = match exit_list_query_name(ip, &self.zone) {
            Ok(name) => name,
            Err(e) => return ProbeOutcome::Miss(MissReason::Unsupported(e.to_string())),
        };

        let outcome = match timeout(self.dns_timeout, lookup_host((name.as_str(), 0))).await {
            Ok(Ok(mut addrs)) => interpret_answer(addrs.next().map(|a| a.ip())),
            Ok(Err(e)) => ProbeOutcome::Miss(MissReason::Lookup(e.to_string())),
            Err(_) => ProbeOutcome::Miss(MissReason::TimedOut(self.dns_timeout)),
        };

        if outcome.is_hit() {
            debug!(%ip, query = %name, "Address is on the Tor exit list");
        } else {
            trace!(%ip, query = %name, ?outcome, "Exit list check finished");
        }
        outcome
    }
}

/// Map the first resolved address to an outcome.
fn interpret_answer(first: Option<IpAddr>) -> ProbeOutcome {
    match first {
        Some(answer) if is_exit_sentinel(answer) => ProbeOutcome::Hit(Evidence::TorExitNode),
        Some(answer) => ProbeOutcome::Miss(MissReason::NotListed(answer)),
        None => ProbeOutcome::Miss(MissReason::NoAnswer),
    }
}
