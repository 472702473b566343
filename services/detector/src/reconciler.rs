//! Startup reconciliation between the cache and the record store.
//!
//! Runs once before the detector serves any classification. The decision
//! table lives in `pxd_reconcile`; this module performs the reads and the
//! cache writes the chosen plan calls for.

use std::sync::Arc;

use pxd_reconcile::{plan_from_counts, plan_from_sets, CountPlan, ExactPlan, ReconcileMode};
use tracing::{error, info, instrument};

use crate::cache::ProxyCache;
use crate::db::RecordStore;
use crate::error::DetectError;

/// What reconciliation did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Both sides were empty; the cache set was cleared.
    Cleared,
    /// The cache was empty and got loaded from the store.
    Loaded,
    /// The cache was cleared, then reloaded from the store.
    Reloaded,
    /// Missing store IPs were added to the cache (exact mode).
    Added,
    /// Nothing to do.
    InSync,
}

/// Summary of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub mode: ReconcileMode,
    pub store_count: u64,
    pub cache_count: u64,
    pub action: ReconcileAction,
    /// IPs written into the cache.
    pub loaded: u64,
}

/// One-shot cache/store reconciler.
pub struct StartupReconciler {
    cache: Arc<dyn ProxyCache>,
    store: Arc<dyn RecordStore>,
    mode: ReconcileMode,
}

impl StartupReconciler {
    pub fn new(
        cache: Arc<dyn ProxyCache>,
        store: Arc<dyn RecordStore>,
        mode: ReconcileMode,
    ) -> Self {
        Self { cache, store, mode }
    }

    /// Reconcile, or fail with [`DetectError::Divergence`] if the cache holds
    /// entries the store cannot account for.
    #[instrument(skip(self), fields(mode = self.mode.as_str(), set_key = self.cache.set_key()))]
    pub async fn run(&self) -> Result<ReconcileReport, DetectError> {
        let report = match self.mode {
            ReconcileMode::Count => self.run_count().await?,
            ReconcileMode::Exact => self.run_exact().await?,
        };

        info!(
            store_count = report.store_count,
            cache_count = report.cache_count,
            action = ?report.action,
            loaded = report.loaded,
            "Reconciliation complete"
        );

        Ok(report)
    }

    async fn run_count(&self) -> Result<ReconcileReport, DetectError> {
        let store_count = self.store.count().await?;
        let cache_count = self.cache.cardinality().await?;
        info!(store_count, cache_count, "Comparing record store and cache sizes");

        let plan = plan_from_counts(store_count, cache_count).map_err(|d| self.diverged(d))?;

        if plan.clears_cache() {
            self.cache.clear().await?;
            info!("Cache set cleared");
        }

        let loaded = if plan.needs_store_ips() {
            let ips = self.store.all_ips().await?;
            self.cache.add_many(&ips).await?;
            info!(count = ips.len(), "Cache populated from record store");
            ips.len() as u64
        } else {
            0
        };

        let action = match plan {
            CountPlan::Clear => ReconcileAction::Cleared,
            CountPlan::Load => ReconcileAction::Loaded,
            CountPlan::ClearAndReload => ReconcileAction::Reloaded,
            CountPlan::InSync => ReconcileAction::InSync,
        };

        Ok(ReconcileReport {
            mode: self.mode,
            store_count,
            cache_count,
            action,
            loaded,
        })
    }

    async fn run_exact(&self) -> Result<ReconcileReport, DetectError> {
        let store_ips = self.store.all_ips().await?;
        let cache_ips = self.cache.members().await?;
        let store_count = store_ips.len() as u64;
        let cache_count = cache_ips.len() as u64;
        info!(store_count, cache_count, "Comparing record store and cache contents");

        let plan = plan_from_sets(store_ips, cache_ips).map_err(|d| self.diverged(d))?;

        let (action, loaded) = match plan {
            ExactPlan::Clear => {
                self.cache.clear().await?;
                (ReconcileAction::Cleared, 0)
            }
            ExactPlan::Add(missing) => {
                self.cache.add_many(&missing).await?;
                (ReconcileAction::Added, missing.len() as u64)
            }
            ExactPlan::InSync => (ReconcileAction::InSync, 0),
        };

        Ok(ReconcileReport {
            mode: self.mode,
            store_count,
            cache_count,
            action,
            loaded,
        })
    }

    fn diverged(&self, divergence: pxd_reconcile::Divergence) -> DetectError {
        error!(
            store_count = divergence.store_count,
            cache_count = divergence.cache_count,
            unknown_sample = ?divergence.unknown_sample,
            "Cache holds entries the record store cannot account for. \
             Clear the cache set and restart; refusing to serve classifications"
        );
        DetectError::Divergence {
            set_key: self.cache.set_key().to_string(),
            source: divergence,
        }
    }
}
