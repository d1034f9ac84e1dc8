use crate::error::AppResult;
use crate::routes::types::{HealthCheckResponse, HealthStatus};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use super::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let start = std::time::Instant::now();

    // Check store connectivity
    let db_health = match tokio::time::timeout(StdDuration::from_secs(5), state.store.ping()).await {
        Ok(Ok(())) => HealthStatus::healthy(start.elapsed().as_millis() as u64),
        Ok(Err(_)) | Err(_) => HealthStatus::unhealthy(),
    };

    // Check cache connectivity
    let cache_health = match &state.cache {
        Some(cache) => {
            let cache_start = std::time::Instant::now();
            match tokio::time::timeout(StdDuration::from_secs(5), cache.ping()).await {
                Ok(Ok(_)) => HealthStatus::healthy(cache_start.elapsed().as_millis() as u64),
                Ok(Err(_)) | Err(_) => HealthStatus::unhealthy(),
            }
        }
        None => HealthStatus::disabled(),
    };

    // Determine overall health
    let overall_status = if db_health.status == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    let response = HealthCheckResponse {
        status: overall_status.to_string(),
        database: db_health,
        cache: cache_health,
        timestamp: chrono::Utc::now(),
    };

    Ok(Json(response))
}
