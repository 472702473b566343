//! Per-IP registry of running probe sets.
//!
//! The first caller for an IP becomes the leader and runs the probes; callers
//! arriving while it runs wait on a oneshot for the leader's verdict. If the
//! leader is dropped before completing, its waiters see a closed channel and
//! retry, so one of them takes over.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

/// Registry of pending verdicts keyed by IP.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    pending: Mutex<HashMap<String, Vec<oneshot::Sender<bool>>>>,
}

/// A caller's place in the registry.
pub(crate) enum Ticket<'a> {
    /// Run the probes, then call [`Leader::complete`].
    Leader(Leader<'a>),
    /// Wait for the leader's verdict.
    Follower(oneshot::Receiver<bool>),
}

impl InFlight {
    /// Join the probe set for `key`, starting one if none is running.
    pub(crate) fn join(&self, key: &str) -> Ticket<'_> {
        let mut pending = self.lock();

        if let Some(waiters) = pending.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Ticket::Follower(rx);
        }

        pending.insert(key.to_string(), Vec::new());
        Ticket::Leader(Leader {
            registry: self,
            key: key.to_string(),
            completed: false,
        })
    }

    /// Number of IPs with a probe set running.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<oneshot::Sender<bool>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ownership of a running probe set.
pub(crate) struct Leader<'a> {
    registry: &'a InFlight,
    key: String,
    completed: bool,
}

impl Leader<'_> {
    /// Publish the verdict to every waiter and leave the registry.
    pub(crate) fn complete(mut self, verdict: bool) {
        let waiters = self.registry.lock().remove(&self.key);
        self.completed = true;

        for tx in waiters.into_iter().flatten() {
            let _ = tx.send(verdict);
        }
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if !self.completed {
            // Dropping the senders wakes the waiters with an error.
            self.registry.lock().remove(&self.key);
        }
    }
}
