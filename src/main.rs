use linkharvest::{build_app, config::Config, jobs::CrawlManager, storage::Database, AppState};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    // Initialize tracing with RUST_LOG env filter (defaults to "info")
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env().expect("Failed to load configuration"));
    let port = config.port;

    let db = Arc::new(
        Database::open(&config.database_path)
            .await
            .expect("Failed to open database"),
    );
    let crawl_manager = Arc::new(CrawlManager::new(db.clone()));

    let state = AppState { db, crawl_manager };
    let app = build_app(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("linkharvest service starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server error");
}
