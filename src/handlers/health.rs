use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::store::KvStore;

#[derive(Serialize)]
pub struct RootResponse {
    message: String,
    version: String,
    status: String,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Conversational AI Bot API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    services: ServiceStatus,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    api: String,
    store: String,
    llm: String,
}

pub async fn health_check(
    Extension(store): Extension<Arc<dyn KvStore>>,
) -> (StatusCode, Json<HealthResponse>) {
    let store_status = match store.ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            services: ServiceStatus {
                api: "running".to_string(),
                store: store_status.to_string(),
                llm: "ready".to_string(),
            },
        }),
    )
}
