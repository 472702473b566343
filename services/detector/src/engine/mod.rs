//! Proxy detection engine.
//!
//! `classify` answers "is this IP a proxy?":
//! 1. Cache membership is the fast path (no network I/O).
//! 2. On a miss, concurrent callers for the same IP share one probe set.
//! 3. The probe set races every configured port against the Tor exit list;
//!    the first hit is written through to the record store and the cache.
//! 4. A negative verdict is only given once every probe has missed.

mod in_flight;
mod race;

use std::net::IpAddr;
use std::sync::Arc;

use pxd_networking::parse_ip;
use pxd_reconcile::ReconcileMode;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::ProxyCache;
use crate::db::{ListQuery, Page, ProxyRecord, RecordStore};
use crate::error::DetectError;
use crate::probe::{Evidence, Probe};
use crate::reconciler::{ReconcileReport, StartupReconciler};

use in_flight::{InFlight, Ticket};

/// Result of deleting a record from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum StoreRemoval {
    Deleted,
    NotFound,
    Failed(String),
}

/// Result of evicting an IP from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum CacheRemoval {
    Removed,
    NotPresent,
    Failed(String),
}

/// Per-backend outcome of [`ProxyDetector::delete_proxy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub store: StoreRemoval,
    pub cache: CacheRemoval,
}

/// Sizes reported by [`ProxyDetector::check_backends`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendCounts {
    pub store: u64,
    pub cache: u64,
}

/// Key used for the cache, the record store and the in-flight registry.
///
/// Addresses that parse use their canonical form; anything else is kept
/// verbatim.
fn canonical_key(raw: &str, parsed: Option<&IpAddr>) -> String {
    match parsed {
        Some(addr) => addr.to_string(),
        None => raw.to_string(),
    }
}

/// Shared handle to the detection engine.
#[derive(Clone)]
pub struct ProxyDetector {
    inner: Arc<DetectorInner>,
}

struct DetectorInner {
    cache: Arc<dyn ProxyCache>,
    store: Arc<dyn RecordStore>,
    probe: Arc<dyn Probe>,
    ports: Vec<u16>,
    in_flight: InFlight,
}

impl ProxyDetector {
    /// Build an engine without reconciling.
    ///
    /// Prefer [`ProxyDetector::init`] for anything that serves traffic.
    pub fn new(
        cache: Arc<dyn ProxyCache>,
        store: Arc<dyn RecordStore>,
        probe: Arc<dyn Probe>,
        ports: Vec<u16>,
    ) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                cache,
                store,
                probe,
                ports,
                in_flight: InFlight::default(),
            }),
        }
    }

    /// Reconcile the cache with the record store, then build the engine.
    ///
    /// Fails with [`DetectError::Divergence`] when the cache holds entries the
    /// store cannot account for; the caller must not serve traffic then.
    pub async fn init(
        cache: Arc<dyn ProxyCache>,
        store: Arc<dyn RecordStore>,
        probe: Arc<dyn Probe>,
        ports: Vec<u16>,
        mode: ReconcileMode,
    ) -> Result<(Self, ReconcileReport), DetectError> {
        info!(ports = ?ports, mode = mode.as_str(), "Initializing proxy detector");

        let report = StartupReconciler::new(Arc::clone(&cache), Arc::clone(&store), mode)
            .run()
            .await?;

        info!("Proxy detector initialized");
        Ok((Self::new(cache, store, probe, ports), report))
    }

    /// Ports probed for unseen addresses.
    pub fn ports(&self) -> &[u16] {
        &self.inner.ports
    }

    /// Number of IPs with a probe set currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Classify `ip` as proxy (`true`) or not (`false`).
    ///
    /// Parseable addresses are keyed by their canonical text form, so
    /// `" 192.0.2.1"` and `"192.0.2.1"` share one cache entry and one record.
    /// Errors only when the cache cannot be consulted; that is never reported
    /// as `false`.
    #[instrument(skip(self))]
    pub async fn classify(&self, ip: &str) -> Result<bool, DetectError> {
        let parsed = parse_ip(ip);
        let key = canonical_key(ip, parsed.as_ref().ok());

        if self.inner.cache.contains(&key).await? {
            debug!("Cache hit");
            match self.inner.store.increment_hits(&key).await {
                Ok(true) => {}
                Ok(false) => warn!("Cached IP has no record; hit not counted"),
                Err(e) => warn!(error = %e, "Failed to count hit"),
            }
            return Ok(true);
        }

        let addr = match parsed {
            Ok(addr) => addr,
            Err(e) => {
                debug!(error = %e, "Unparseable address; no probe can succeed");
                return Ok(false);
            }
        };

        loop {
            match self.inner.in_flight.join(&key) {
                Ticket::Leader(leader) => {
                    let verdict = self.detect(&key, addr).await;
                    leader.complete(verdict);
                    return Ok(verdict);
                }
                Ticket::Follower(rx) => match rx.await {
                    Ok(verdict) => {
                        debug!(verdict, "Joined running probe set");
                        return Ok(verdict);
                    }
                    // Leader went away without a verdict; try to lead.
                    Err(_) => continue,
                },
            }
        }
    }

    /// Run the probe set for an uncached address and record a positive verdict.
    async fn detect(&self, key: &str, addr: IpAddr) -> bool {
        match race::race(Arc::clone(&self.inner.probe), addr, &self.inner.ports).await {
            Some(evidence) => {
                info!(%evidence, "Classified as proxy");
                self.record_evidence(key, evidence).await;
                true
            }
            None => {
                debug!("Not a proxy");
                false
            }
        }
    }

    /// Write evidence through to the store and the cache.
    ///
    /// Both writes are best-effort: failures are logged and never change the
    /// verdict.
    async fn record_evidence(&self, ip: &str, evidence: Evidence) {
        match self.inner.store.upsert_evidence(ip, &evidence).await {
            Ok(record) => debug!(hits = record.hits, reason = %record.reason, "Evidence stored"),
            Err(e) => warn!(error = %e, %evidence, "Failed to store evidence"),
        }

        if let Err(e) = self.inner.cache.add(ip).await {
            warn!(error = %e, "Failed to add IP to cache");
        }
    }

    /// A page of records, newest first.
    pub async fn list_proxies(&self, query: &ListQuery) -> Result<Page<ProxyRecord>, DetectError> {
        Ok(self.inner.store.list(query).await?)
    }

    /// Remove `ip` from the store and the cache.
    ///
    /// Both removals are always attempted; each reports its own result.
    #[instrument(skip(self))]
    pub async fn delete_proxy(&self, ip: &str) -> DeleteOutcome {
        let key = canonical_key(ip, parse_ip(ip).ok().as_ref());

        let store = match self.inner.store.delete(&key).await {
            Ok(true) => StoreRemoval::Deleted,
            Ok(false) => StoreRemoval::NotFound,
            Err(e) => {
                warn!(error = %e, "Failed to delete record");
                StoreRemoval::Failed(e.to_string())
            }
        };

        let cache = match self.inner.cache.remove(&key).await {
            Ok(true) => CacheRemoval::Removed,
            Ok(false) => CacheRemoval::NotPresent,
            Err(e) => {
                warn!(error = %e, "Failed to evict IP from cache");
                CacheRemoval::Failed(e.to_string())
            }
        };

        info!(store = ?store, cache = ?cache, "Proxy deleted");
        DeleteOutcome { store, cache }
    }

    /// Count both backends; fails if either is unreachable.
    pub async fn check_backends(&self) -> Result<BackendCounts, DetectError> {
        let store = self.inner.store.count().await?;
        let cache = self.inner.cache.cardinality().await?;
        Ok(BackendCounts { store, cache })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(canonical_key(" 192.0.2.1 ", Some(&v4)), "192.0.2.1");

        let v6: IpAddr = "2001:DB8::1".parse().unwrap();
        assert_eq!(canonical_key("2001:DB8::1", Some(&v6)), "2001:db8::1");

        assert_eq!(canonical_key("not-an-ip", None), "not-an-ip");
    }
}
