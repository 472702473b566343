//! Classification and proxy record endpoints.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, FieldError};
use crate::db::{ListQuery, DEFAULT_PAGE_LIMIT};
use crate::state::AppState;

/// Create proxy routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/classify/{ip}", get(classify))
        .route("/proxies", get(list_proxies))
        .route("/proxies/{ip}", delete(delete_proxy))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Verdict for a single address.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct ClassifyResponse {
    pub ip: String,
    pub is_proxy: bool,
}

/// Query parameters for listing proxies.
#[derive(Debug, Default, Deserialize)]
pub struct ListProxiesQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    /// Page size (clamped to 1..=100).
    pub limit: Option<u32>,
    /// Case-insensitive substring filter on the IP.
    pub search: Option<String>,
}

impl From<ListProxiesQuery> for ListQuery {
    fn from(query: ListProxiesQuery) -> Self {
        ListQuery {
            page: query.page.unwrap_or(1),
            limit: query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            search: query.search,
        }
        .normalized()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Classify an address.
///
/// GET /v1/classify/{ip}
async fn classify(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let is_proxy = state
        .detector()
        .classify(&ip)
        .await
        .map_err(|e| ApiError::from(e).with_instance(format!("/v1/classify/{ip}")))?;

    Ok(Json(ClassifyResponse { ip, is_proxy }))
}

/// List detected proxies, newest first.
///
/// GET /v1/proxies
async fn list_proxies(
    State(state): State<AppState>,
    query: Result<Query<ListProxiesQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        ApiError::bad_request("invalid_query", "Invalid query parameters")
            .with_instance("/v1/proxies")
            .with_details(vec![FieldError {
                field: "query".to_string(),
                message: rejection.body_text(),
            }])
    })?;
    let query = ListQuery::from(query);
    let page = state.detector().list_proxies(&query).await?;
    Ok(Json(page))
}

/// Remove an address from the record store and the cache.
///
/// DELETE /v1/proxies/{ip}
async fn delete_proxy(State(state): State<AppState>, Path(ip): Path<String>) -> impl IntoResponse {
    Json(state.detector().delete_proxy(&ip).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults_and_clamps() {
        let query = ListQuery::from(ListProxiesQuery::default());
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(query.search, None);

        let query = ListQuery::from(ListProxiesQuery {
            page: Some(0),
            limit: Some(5000),
            search: Some("  ".to_string()),
        });
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, 100);
        assert_eq!(query.search, None);
    }
}
