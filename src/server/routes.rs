use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::crawler::CrawlError;
use crate::models::{LinkQuery, StartRequest};
use crate::AppState;

/// POST /api/v1/crawls
///
/// Validates the start URL, creates the crawl record and schedules the
/// crawl. Returns 202 Accepted with the crawl identity.
pub async fn start_crawl(
    State(state): State<AppState>,
    Json(payload): Json<StartRequest>,
) -> impl IntoResponse {
    match state.crawl_manager.start(&payload.url, payload.options).await {
        Ok(resp) => (StatusCode::ACCEPTED, Json(resp)).into_response(),
        Err(CrawlError::Storage(e)) => {
            tracing::error!(error = %e, "Failed to create crawl record");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage failure" })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /api/v1/crawls/{base_domain}/status
///
/// Latest crawl record for the domain; includes the outgoing-domain
/// summary once the crawl has completed.
pub async fn crawl_status(
    State(state): State<AppState>,
    Path(base_domain): Path<String>,
) -> impl IntoResponse {
    match state.crawl_manager.status(&base_domain).await {
        Ok(Some(status)) => (StatusCode::OK, Json(status)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no crawl for domain" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Status query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /api/v1/crawls/{base_domain}/links
///
/// Paginated external-link rows from the latest crawl, with optional
/// anchor-text, rel and target-domain filters.
pub async fn crawl_links(
    State(state): State<AppState>,
    Path(base_domain): Path<String>,
    Query(query): Query<LinkQuery>,
) -> impl IntoResponse {
    match state.crawl_manager.links(&base_domain, &query).await {
        Ok(Some(page)) => (StatusCode::OK, Json(page)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no crawl for domain" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Links query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /api/v1/crawls/{base_domain}/cancel
pub async fn cancel_crawl(
    State(state): State<AppState>,
    Path(base_domain): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.crawl_manager.cancel(&base_domain).await;
    if cancelled {
        (StatusCode::OK, Json(json!({ "cancelled": true }))).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no active crawl for domain" })),
        )
            .into_response()
    }
}

/// GET /api/v1/health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
