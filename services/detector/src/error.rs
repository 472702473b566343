//! Detector error types.

use pxd_reconcile::Divergence;
use thiserror::Error;

use crate::cache::CacheError;
use crate::db::DbError;

/// Errors surfaced by the detection engine.
///
/// A probe failing is never an error; these cover the backends the engine
/// needs in order to reach a verdict at all.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The cache could not be consulted.
    #[error("cache unavailable: {0}")]
    Cache(#[from] CacheError),

    /// The record store could not be consulted.
    #[error("record store unavailable: {0}")]
    Store(#[from] DbError),

    /// Startup reconciliation found cache entries the store cannot explain.
    #[error("{source}; clear the cache set '{set_key}' and restart")]
    Divergence {
        set_key: String,
        #[source]
        source: Divergence,
    },
}

impl DetectError {
    /// Returns true if an operator must intervene before the service can start.
    pub fn is_divergence(&self) -> bool {
        matches!(self, Self::Divergence { .. })
    }
}
