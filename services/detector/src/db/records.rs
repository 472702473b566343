//! Proxy record storage.
//!
//! One record per detected IP. Records are created and updated through
//! upserts keyed on `ip`, so repeated detections never produce duplicates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use super::DbError;
use crate::probe::Evidence;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A persisted detection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRecord {
    pub ip: String,
    /// Open port that triggered the detection; `None` for non-port evidence.
    pub port: Option<u16>,
    pub reason: String,
    pub hits: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ProxyRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let ip: String = row.try_get("ip")?;
        let port: Option<i32> = row.try_get("port")?;
        let port = port
            .map(u16::try_from)
            .transpose()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "port".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            ip,
            port,
            reason: row.try_get("reason")?,
            hits: row.try_get("hits")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Listing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    /// Case-insensitive substring filter on `ip`.
    pub search: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            search: None,
        }
    }
}

impl ListQuery {
    /// Clamp page and limit into range and drop blank search terms.
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    /// Row offset of the first item on this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Returns true if `ip` passes the search filter.
    pub fn matches(&self, ip: &str) -> bool {
        match &self.search {
            Some(term) => ip.to_lowercase().contains(&term.to_lowercase()),
            None => true,
        }
    }

    /// SQL `ILIKE` pattern equivalent to [`ListQuery::matches`].
    fn like_pattern(&self) -> Option<String> {
        self.search.as_deref().map(|term| {
            let mut escaped = String::with_capacity(term.len() + 2);
            escaped.push('%');
            for c in term.chars() {
                if matches!(c, '\\' | '%' | '_') {
                    escaped.push('\\');
                }
                escaped.push(c);
            }
            escaped.push('%');
            escaped
        })
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total matching rows across all pages.
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl<T> Page<T> {
    /// Build a page from its items, the total match count and the (normalized) query.
    pub fn new(items: Vec<T>, total: u64, query: &ListQuery) -> Self {
        let limit = u64::from(query.limit.max(1));
        let total_pages = total.div_ceil(limit);
        let page = u64::from(query.page);

        Self {
            items,
            total,
            page: query.page,
            limit: query.limit,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

/// Durable store of proxy records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Number of records.
    async fn count(&self) -> Result<u64, DbError>;

    /// Every recorded IP.
    async fn all_ips(&self) -> Result<Vec<String>, DbError>;

    /// A page of records, newest first.
    async fn list(&self, query: &ListQuery) -> Result<Page<ProxyRecord>, DbError>;

    /// Increment the hit counter. Returns false if no record exists for `ip`.
    async fn increment_hits(&self, ip: &str) -> Result<bool, DbError>;

    /// Insert or update the evidence for `ip`.
    ///
    /// An existing record keeps its `hits` and `created_at`.
    async fn upsert_evidence(&self, ip: &str, evidence: &Evidence)
        -> Result<ProxyRecord, DbError>;

    /// Delete the record. Returns false if there was nothing to delete.
    async fn delete(&self, ip: &str) -> Result<bool, DbError>;
}

/// Postgres-backed record store.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn count(&self) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proxy_records")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(count.max(0) as u64)
    }

    async fn all_ips(&self) -> Result<Vec<String>, DbError> {
        sqlx::query_scalar("SELECT ip FROM proxy_records")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)
    }

    async fn list(&self, query: &ListQuery) -> Result<Page<ProxyRecord>, DbError> {
        let query = query.normalized();
        let pattern = query.like_pattern();

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM proxy_records
            WHERE ($1::text IS NULL OR ip ILIKE $1 ESCAPE '\')
            "#,
        )
        .bind(pattern.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let items = sqlx::query_as::<_, ProxyRecord>(
            r#"
            SELECT ip, port, reason, hits, created_at, updated_at
            FROM proxy_records
            WHERE ($1::text IS NULL OR ip ILIKE $1 ESCAPE '\')
            ORDER BY created_at DESC, ip ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(pattern.as_deref())
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(Page::new(items, total.max(0) as u64, &query))
    }

    async fn increment_hits(&self, ip: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE proxy_records
            SET hits = hits + 1,
                updated_at = now()
            WHERE ip = $1
            "#,
        )
        .bind(ip)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_evidence(
        &self,
        ip: &str,
        evidence: &Evidence,
    ) -> Result<ProxyRecord, DbError> {
        sqlx::query_as::<_, ProxyRecord>(
            r#"
            INSERT INTO proxy_records (ip, port, reason)
            VALUES ($1, $2, $3)
            ON CONFLICT (ip) DO UPDATE
            SET port = EXCLUDED.port,
                reason = EXCLUDED.reason,
                updated_at = now()
            RETURNING ip, port, reason, hits, created_at, updated_at
            "#,
        )
        .bind(ip)
        .bind(evidence.port().map(i32::from))
        .bind(evidence.reason())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    async fn delete(&self, ip: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM proxy_records WHERE ip = $1")
            .bind(ip)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}
