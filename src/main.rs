use anyhow::Result;
use axum::{
    http::HeaderValue,
    routing::{delete, get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use chat_api_server::config::Settings;
use chat_api_server::handlers;
use chat_api_server::services::{ChatService, LlmService, MetricsService, SessionService};
use chat_api_server::store::{self, KvStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chat_api_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("Starting chat API server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("Configuration loaded");

    // Connect the key-value store (falls back to in-memory when unreachable)
    let kv_store = store::connect(&settings.store).await;

    // Initialize services
    let session_service = Arc::new(SessionService::new(
        kv_store.clone(),
        settings.session.ttl_seconds,
    ));
    let metrics_service = Arc::new(MetricsService::new(kv_store.clone()));
    let llm_service = Arc::new(LlmService::new(&settings.llm));
    let chat_service = Arc::new(ChatService::new(
        session_service.clone(),
        metrics_service.clone(),
        llm_service,
    ));
    info!("Chat services initialized");

    // Build router
    let app = build_router(
        kv_store,
        session_service,
        metrics_service,
        chat_service,
        &settings,
    );

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(
    kv_store: Arc<dyn KvStore>,
    session_service: Arc<SessionService>,
    metrics_service: Arc<MetricsService>,
    chat_service: Arc<ChatService>,
    settings: &Settings,
) -> Router {
    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/chat/start", post(handlers::chat::start_session))
        .route("/chat/message", post(handlers::chat::send_message))
        .route("/chat/session/{id}", delete(handlers::chat::end_session))
        .route("/admin/metrics", get(handlers::metrics::get_metrics))
        .route("/admin/metrics/reset", post(handlers::metrics::reset_metrics))
        // Shared state
        .layer(Extension(kv_store))
        .layer(Extension(session_service))
        .layer(Extension(metrics_service))
        .layer(Extension(chat_service))
        // CORS
        .layer(cors_layer(&settings.cors.allowed_origins))
        // Tracing
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
