//! Cache/record-store reconciliation primitives.
//!
//! This library decides how to bring the proxy cache (a volatile set of IPs)
//! back in line with the durable record store at startup. Key concepts:
//!
//! - **Store**: the durable source of truth (one record per detected IP).
//! - **Cache**: the fast membership set consulted on every classification.
//! - **Divergence**: the cache knows about IPs the store cannot account for.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - The store is never modified by a plan, only the cache
//! - A plan never silently drops cache entries the store does not know about;
//!   that situation is reported as [`Divergence`] instead

use std::collections::BTreeSet;

use thiserror::Error;

/// Maximum number of offending IPs carried in a [`Divergence`] for display.
pub const DIVERGENCE_SAMPLE_LIMIT: usize = 10;

/// The cache holds more than the store can explain.
///
/// Callers must refuse to serve traffic until an operator clears the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cache and record store are out of sync (store {store_count}, cache {cache_count})")]
pub struct Divergence {
    /// Number of records in the store.
    pub store_count: u64,

    /// Number of members in the cache.
    pub cache_count: u64,

    /// Sample of cache members unknown to the store (exact mode only).
    pub unknown_sample: Vec<String>,
}

/// How the reconciler compares the two sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Compare cardinalities only. Cheap, but blind to same-size content drift.
    #[default]
    Count,

    /// Load both IP sets and diff them.
    Exact,
}

impl ReconcileMode {
    /// Parse from a config value (`count` or `exact`, case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "exact" => Some(Self::Exact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Exact => "exact",
        }
    }
}

/// Action derived from a cardinality comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountPlan {
    /// Both sides empty: clear the cache for cleanliness.
    Clear,

    /// Store populated, cache empty: load every store IP into the cache.
    Load,

    /// Store has more than the cache: clear, then reload from the store.
    ClearAndReload,

    /// Same non-zero size on both sides: assumed in sync.
    InSync,
}

impl CountPlan {
    /// Returns true if the plan needs the full IP list from the store.
    pub fn needs_store_ips(&self) -> bool {
        matches!(self, Self::Load | Self::ClearAndReload)
    }

    /// Returns true if the plan clears the cache first.
    pub fn clears_cache(&self) -> bool {
        matches!(self, Self::Clear | Self::ClearAndReload)
    }
}

/// Decide what to do from the store count `store` and cache cardinality `cache`.
pub fn plan_from_counts(store: u64, cache: u64) -> Result<CountPlan, Divergence> {
    match (store, cache) {
        (0, 0) => Ok(CountPlan::Clear),
        (_, 0) => Ok(CountPlan::Load),
        (s, c) if s == c => Ok(CountPlan::InSync),
        (s, c) if s > c => Ok(CountPlan::ClearAndReload),
        (s, c) => Err(Divergence {
            store_count: s,
            cache_count: c,
            unknown_sample: Vec::new(),
        }),
    }
}

/// Set difference between store and cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    /// IPs recorded in the store but absent from the cache.
    pub missing_from_cache: Vec<String>,

    /// IPs cached but unknown to the store.
    pub unknown_to_store: Vec<String>,
}

impl SetDiff {
    /// Returns true if both sides hold exactly the same IPs.
    pub fn is_empty(&self) -> bool {
        self.missing_from_cache.is_empty() && self.unknown_to_store.is_empty()
    }
}

/// Compute the difference between store IPs and cache members.
///
/// Output vectors are sorted and deduplicated.
pub fn diff_sets<S, C>(store: S, cache: C) -> SetDiff
where
    S: IntoIterator,
    S::Item: Into<String>,
    C: IntoIterator,
    C::Item: Into<String>,
{
    let store: BTreeSet<String> = store.into_iter().map(Into::into).collect();
    let cache: BTreeSet<String> = cache.into_iter().map(Into::into).collect();

    SetDiff {
        missing_from_cache: store.difference(&cache).cloned().collect(),
        unknown_to_store: cache.difference(&store).cloned().collect(),
    }
}

/// Action derived from a content comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExactPlan {
    /// Both sides empty: clear the cache.
    Clear,

    /// Add these store IPs to the cache.
    Add(Vec<String>),

    /// Contents already match.
    InSync,
}

/// Decide what to do from the full contents of both sides.
pub fn plan_from_sets<S, C>(store: S, cache: C) -> Result<ExactPlan, Divergence>
where
    S: IntoIterator,
    S::Item: Into<String>,
    C: IntoIterator,
    C::Item: Into<String>,
{
    let store: Vec<String> = store.into_iter().map(Into::into).collect();
    let cache: Vec<String> = cache.into_iter().map(Into::into).collect();
    let store_count = store.len() as u64;
    let cache_count = cache.len() as u64;

    if store.is_empty() && cache.is_empty() {
        return Ok(ExactPlan::Clear);
    }

    let diff = diff_sets(store, cache);
    if !diff.unknown_to_store.is_empty() {
        let mut unknown_sample = diff.unknown_to_store;
        unknown_sample.truncate(DIVERGENCE_SAMPLE_LIMIT);
        return Err(Divergence {
            store_count,
            cache_count,
            unknown_sample,
        });
    }

    if diff.missing_from_cache.is_empty() {
        Ok(ExactPlan::InSync)
    } else {
        Ok(ExactPlan::Add(diff.missing_from_cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_count_plan_table() {
        assert_eq!(plan_from_counts(0, 0), Ok(CountPlan::Clear));
        assert_eq!(plan_from_counts(10, 0), Ok(CountPlan::Load));
        assert_eq!(plan_from_counts(7, 7), Ok(CountPlan::InSync));
        assert_eq!(plan_from_counts(9, 4), Ok(CountPlan::ClearAndReload));

        let err = plan_from_counts(0, 5).unwrap_err();
        assert_eq!(err.store_count, 0);
        assert_eq!(err.cache_count, 5);

        assert!(plan_from_counts(3, 8).is_err());
    }

    #[test]
    fn test_count_plan_helpers() {
        assert!(CountPlan::Load.needs_store_ips());
        assert!(CountPlan::ClearAndReload.needs_store_ips());
        assert!(!CountPlan::InSync.needs_store_ips());
        assert!(CountPlan::Clear.clears_cache());
        assert!(!CountPlan::Load.clears_cache());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(ReconcileMode::parse("count"), Some(ReconcileMode::Count));
        assert_eq!(ReconcileMode::parse(" EXACT "), Some(ReconcileMode::Exact));
        assert_eq!(ReconcileMode::parse("fuzzy"), None);
        assert_eq!(ReconcileMode::default(), ReconcileMode::Count);
    }

    #[test]
    fn test_diff_sets() {
        let diff = diff_sets(["1.1.1.1", "2.2.2.2", "3.3.3.3"], ["3.3.3.3", "4.4.4.4"]);
        assert_eq!(diff.missing_from_cache, vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(diff.unknown_to_store, vec!["4.4.4.4"]);
        assert!(!diff.is_empty());

        assert!(diff_sets(["a"], ["a"]).is_empty());
    }

    #[test]
    fn test_exact_plan() {
        let empty: [&str; 0] = [];
        assert_eq!(plan_from_sets(empty, empty), Ok(ExactPlan::Clear));
        assert_eq!(
            plan_from_sets(["1.1.1.1"], ["1.1.1.1"]),
            Ok(ExactPlan::InSync)
        );
        assert_eq!(
            plan_from_sets(["1.1.1.1", "2.2.2.2"], ["1.1.1.1"]),
            Ok(ExactPlan::Add(vec!["2.2.2.2".to_string()]))
        );

        // Same size, different content: count mode would miss this.
        let err = plan_from_sets(["1.1.1.1"], ["9.9.9.9"]).unwrap_err();
        assert_eq!(err.unknown_sample, vec!["9.9.9.9".to_string()]);
        assert_eq!(plan_from_counts(1, 1), Ok(CountPlan::InSync));
    }

    #[test]
    fn test_divergence_sample_is_bounded() {
        let cache: Vec<String> = (0..50).map(|i| format!("10.0.0.{i}")).collect();
        let err = plan_from_sets(Vec::<String>::new(), cache).unwrap_err();
        assert_eq!(err.unknown_sample.len(), DIVERGENCE_SAMPLE_LIMIT);
        assert_eq!(err.cache_count, 50);
    }

    proptest! {
        #[test]
        fn prop_cache_larger_than_store_always_diverges(
            store in 0u64..10_000,
            extra in 1u64..10_000,
        ) {
            prop_assert!(plan_from_counts(store, store + extra).is_err());
        }

        #[test]
        fn prop_store_at_least_cache_never_diverges(cache in 0u64..10_000, extra in 0u64..10_000) {
            prop_assert!(plan_from_counts(cache + extra, cache).is_ok());
        }

        #[test]
        fn prop_exact_plan_never_loses_store_ips(
            store in proptest::collection::btree_set("[0-9]{1,3}", 0..20),
            keep in proptest::collection::vec(any::<bool>(), 20),
        ) {
            let cache: Vec<String> = store
                .iter()
                .zip(keep.iter())
                .filter(|(_, k)| **k)
                .map(|(ip, _)| ip.clone())
                .collect();

            match plan_from_sets(store.iter().cloned(), cache.clone()).unwrap() {
                ExactPlan::Clear => prop_assert!(store.is_empty()),
                ExactPlan::InSync => prop_assert_eq!(cache.len(), store.len()),
                ExactPlan::Add(missing) => {
                    prop_assert_eq!(missing.len() + cache.len(), store.len());
                }
            }
        }
    }
}
