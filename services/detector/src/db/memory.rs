//! In-memory record store.
//!
//! Mirrors the Postgres semantics (upsert keyed on `ip`, newest-first
//! listing, case-insensitive substring search) for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{DbError, ListQuery, Page, ProxyRecord, RecordStore};
use crate::probe::Evidence;

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, ProxyRecord>>,

    /// When set, every operation fails with `DbError::Unavailable`.
    unavailable: AtomicBool,

    /// Number of upserts performed.
    upserts: AtomicU64,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with port evidence for each IP.
    pub fn with_ips<I, S>(ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        let records = ips
            .into_iter()
            .map(Into::into)
            .map(|ip: String| {
                let record = ProxyRecord {
                    ip: ip.clone(),
                    port: Some(8080),
                    reason: Evidence::OpenPort(8080).reason(),
                    hits: 1,
                    created_at: now,
                    updated_at: now,
                };
                (ip, record)
            })
            .collect();

        Self {
            records: RwLock::new(records),
            ..Default::default()
        }
    }

    /// Simulate the store going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of upserts performed so far.
    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Fetch a single record.
    pub async fn get(&self, ip: &str) -> Option<ProxyRecord> {
        self.records.read().await.get(ip).cloned()
    }

    fn check_available(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(DbError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn count(&self) -> Result<u64, DbError> {
        self.check_available()?;
        Ok(self.records.read().await.len() as u64)
    }

    async fn all_ips(&self) -> Result<Vec<String>, DbError> {
        self.check_available()?;
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn list(&self, query: &ListQuery) -> Result<Page<ProxyRecord>, DbError> {
        self.check_available()?;
        let query = query.normalized();

        let mut matching: Vec<ProxyRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| query.matches(&r.ip))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.ip.cmp(&b.ip))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();

        Ok(Page::new(items, total, &query))
    }

    async fn increment_hits(&self, ip: &str) -> Result<bool, DbError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        match records.get_mut(ip) {
            Some(record) => {
                record.hits += 1;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_evidence(
        &self,
        ip: &str,
        evidence: &Evidence,
    ) -> Result<ProxyRecord, DbError> {
        self.check_available()?;
        self.upserts.fetch_add(1, Ordering::SeqCst);

        let now = Utc::now();
        let mut records = self.records.write().await;
        let record = records
            .entry(ip.to_string())
            .and_modify(|r| {
                r.port = evidence.port();
                r.reason = evidence.reason();
                r.updated_at = now;
            })
            .or_insert_with(|| ProxyRecord {
                ip: ip.to_string(),
                port: evidence.port(),
                reason: evidence.reason(),
                hits: 1,
                created_at: now,
                updated_at: now,
            });

        Ok(record.clone())
    }

    async fn delete(&self, ip: &str) -> Result<bool, DbError> {
        self.check_available()?;
        Ok(self.records.write().await.remove(ip).is_some())
    }
}
