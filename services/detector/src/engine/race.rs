//! Concurrent candidate race.
//!
//! One task per configured port plus one exit-list task. The first hit wins
//! and is returned immediately; a miss is only reported once every task has
//! finished. Losing tasks are detached, not aborted, and run out their own
//! timeouts in the background.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::probe::{Evidence, Probe, ProbeOutcome};

/// One independent check in the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Candidate {
    Port(u16),
    ExitNode,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(port) => write!(f, "port:{port}"),
            Self::ExitNode => f.write_str("exit-list"),
        }
    }
}

/// Candidates for a probe set: every port, then the exit-list check.
pub(crate) fn candidates(ports: &[u16]) -> Vec<Candidate> {
    ports
        .iter()
        .copied()
        .map(Candidate::Port)
        .chain(std::iter::once(Candidate::ExitNode))
        .collect()
}

/// Run every candidate concurrently against `ip`.
///
/// Returns the evidence of the first candidate to hit, or `None` once all of
/// them have missed.
pub(crate) async fn race(probe: Arc<dyn Probe>, ip: IpAddr, ports: &[u16]) -> Option<Evidence> {
    let mut pending: FuturesUnordered<_> = candidates(ports)
        .into_iter()
        .map(|candidate| {
            let probe = Arc::clone(&probe);
            let handle = tokio::spawn(async move {
                match candidate {
                    Candidate::Port(port) => probe.probe_port(ip, port).await,
                    Candidate::ExitNode => probe.check_exit_node(ip).await,
                }
            });
            async move { (candidate, handle.await) }
        })
        .collect();

    let total = pending.len();

    while let Some((candidate, joined)) = pending.next().await {
        match joined {
            Ok(ProbeOutcome::Hit(evidence)) => {
                debug!(
                    %ip,
                    %candidate,
                    still_running = pending.len(),
                    "Candidate hit"
                );
                // Dropping `pending` drops the join handles, which detaches
                // the remaining tasks without cancelling them.
                return Some(evidence);
            }
            Ok(ProbeOutcome::Miss(reason)) => {
                debug!(%ip, %candidate, %reason, "Candidate missed");
            }
            Err(e) => {
                warn!(%ip, %candidate, error = %e, "Candidate task failed");
            }
        }
    }

    debug!(%ip, candidates = total, "Every candidate missed");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::probe::MockProbe;

    #[test]
    fn test_candidates() {
        assert_eq!(
            candidates(&[8080, 3128]),
            vec![
                Candidate::Port(8080),
                Candidate::Port(3128),
                Candidate::ExitNode
            ]
        );
        assert_eq!(candidates(&[]), vec![Candidate::ExitNode]);
    }

    #[tokio::test]
    async fn test_first_hit_wins_without_waiting() {
        let probe = Arc::new(
            MockProbe::new()
                .with_open_port(3128, Duration::from_millis(10))
                .with_miss_delay(Duration::from_millis(400)),
        );
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let start = Instant::now();
        let evidence = race(probe.clone(), ip, &[8080, 3128, 1080]).await;
        assert_eq!(evidence, Some(Evidence::OpenPort(3128)));
        assert!(start.elapsed() < Duration::from_millis(300));
        assert_eq!(probe.started(), 4);

        // Losers keep running in the background.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(probe.completed(), 4);
    }

    #[tokio::test]
    async fn test_miss_waits_for_every_candidate() {
        let probe = Arc::new(MockProbe::new().with_miss_delay(Duration::from_millis(20)));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let evidence = race(probe.clone(), ip, &[8080, 3128]).await;
        assert_eq!(evidence, None);
        assert_eq!(probe.completed(), 3);
    }
}
