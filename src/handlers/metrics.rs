use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde::Serialize;
use tracing::info;

use crate::services::metrics_service::{MetricsService, MetricsSnapshot};
use crate::utils::error::ApiError;

pub async fn get_metrics(
    Extension(metrics): Extension<Arc<MetricsService>>,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    Ok(Json(metrics.snapshot().await?))
}

#[derive(Serialize)]
pub struct ResetResponse {
    message: String,
}

pub async fn reset_metrics(
    Extension(metrics): Extension<Arc<MetricsService>>,
) -> Result<Json<ResetResponse>, ApiError> {
    metrics.reset().await?;
    info!("Metrics reset by admin request");
    Ok(Json(ResetResponse {
        message: "Metrics reset successfully".to_string(),
    }))
}
