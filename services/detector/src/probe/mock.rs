//! Scripted probe for testing and development.
//!
//! Outcomes are configured up front: which ports answer, whether the address
//! is on the exit list, and how long each check takes. The probe counts how
//! many checks started and finished so callers can assert on fan-out and on
//! the "no early negative" rule.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Evidence, MissReason, Probe, ProbeOutcome};

/// Scripted probe.
#[derive(Debug, Default)]
pub struct MockProbe {
    /// Open ports and the delay before each reports open.
    open_ports: HashMap<u16, Duration>,

    /// Delay before reporting an exit-list hit; `None` means not listed.
    exit_node: Option<Duration>,

    /// Delay before reporting any miss.
    miss_delay: Duration,

    /// When set, every check misses regardless of the script.
    offline: AtomicBool,

    started: AtomicUsize,
    completed: AtomicUsize,
    port_checks: AtomicUsize,
    exit_checks: AtomicUsize,
}

impl MockProbe {
    /// A probe for which nothing is reachable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `port` open after `delay`.
    pub fn with_open_port(mut self, port: u16, delay: Duration) -> Self {
        self.open_ports.insert(port, delay);
        self
    }

    /// Report an exit-list hit after `delay`.
    pub fn with_exit_node(mut self, delay: Duration) -> Self {
        self.exit_node = Some(delay);
        self
    }

    /// Delay every miss by `delay`.
    pub fn with_miss_delay(mut self, delay: Duration) -> Self {
        self.miss_delay = delay;
        self
    }

    /// Take the whole network away (or give it back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Checks started so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Checks finished so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Port checks started so far.
    pub fn port_checks(&self) -> usize {
        self.port_checks.load(Ordering::SeqCst)
    }

    /// Exit-list checks started so far.
    pub fn exit_checks(&self) -> usize {
        self.exit_checks.load(Ordering::SeqCst)
    }

    async fn finish(&self, delay: Duration, outcome: ProbeOutcome) -> ProbeOutcome {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for MockProbe {
    async fn probe_port(&self, ip: IpAddr, port: u16) -> ProbeOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.port_checks.fetch_add(1, Ordering::SeqCst);
        debug!(%ip, port, "[MOCK] Probing port");

        match self.open_ports.get(&port) {
            Some(delay) if !self.is_offline() => {
                self.finish(*delay, ProbeOutcome::Hit(Evidence::OpenPort(port)))
                    .await
            }
            _ => {
                self.finish(self.miss_delay, ProbeOutcome::Miss(MissReason::Refused))
                    .await
            }
        }
    }

    async fn check_exit_node(&self, ip: IpAddr) -> ProbeOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.exit_checks.fetch_add(1, Ordering::SeqCst);
        debug!(%ip, "[MOCK] Checking exit list");

        match self.exit_node {
            Some(delay) if !self.is_offline() => {
                self.finish(delay, ProbeOutcome::Hit(Evidence::TorExitNode))
                    .await
            }
            _ => {
                self.finish(
                    self.miss_delay,
                    ProbeOutcome::Miss(MissReason::Lookup("NXDOMAIN".to_string())),
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let probe = MockProbe::new().with_open_port(3128, Duration::ZERO);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(probe.probe_port(ip, 3128).await.is_hit());
        assert!(!probe.probe_port(ip, 8080).await.is_hit());
        assert!(!probe.check_exit_node(ip).await.is_hit());
        assert_eq!(probe.started(), 3);
        assert_eq!(probe.completed(), 3);
        assert_eq!(probe.port_checks(), 2);
        assert_eq!(probe.exit_checks(), 1);

        probe.set_offline(true);
        assert!(!probe.probe_port(ip, 3128).await.is_hit());
    }
}
