pub mod config;
pub mod crawler;
pub mod jobs;
pub mod models;
pub mod server;
pub mod storage;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::jobs::CrawlManager;
use crate::storage::Database;

/// Shared application state passed to all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub crawl_manager: Arc<CrawlManager>,
}

pub fn build_app(state: AppState) -> Router {
    // CORS layer -- permissive for the internal service
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/crawls", post(server::routes::start_crawl))
        .route(
            "/api/v1/crawls/{base_domain}/status",
            get(server::routes::crawl_status),
        )
        .route(
            "/api/v1/crawls/{base_domain}/links",
            get(server::routes::crawl_links),
        )
        .route(
            "/api/v1/crawls/{base_domain}/cancel",
            post(server::routes::cancel_crawl),
        )
        .route("/api/v1/health", get(server::routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
