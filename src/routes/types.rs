use crate::services::access_gate::GateScope;
use crate::services::resolver::RedirectOutcome;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

/// Stable JSON body of the redirect endpoints
#[derive(Debug, Serialize, PartialEq)]
pub struct RedirectResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<GateScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_password: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

impl RedirectResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            target_url: None,
            scope: None,
            requires_password: None,
            retry_after_seconds: None,
        }
    }

    pub fn too_many_attempts(retry_after_seconds: i64) -> Self {
        Self {
            retry_after_seconds: Some(retry_after_seconds),
            ..Self::status("too_many_attempts")
        }
    }
}

impl From<&RedirectOutcome> for RedirectResponse {
    fn from(outcome: &RedirectOutcome) -> Self {
        let base = Self::status(outcome.as_str());
        match outcome {
            RedirectOutcome::Redirect(target_url) => Self {
                target_url: Some(target_url.clone()),
                ..base
            },
            RedirectOutcome::NeedsCredential(scope) => Self {
                scope: Some(*scope),
                requires_password: Some(true),
                ..base
            },
            RedirectOutcome::InvalidCredential(scope) => Self {
                scope: Some(*scope),
                ..base
            },
            RedirectOutcome::NotFound | RedirectOutcome::Inactive | RedirectOutcome::Expired => base,
        }
    }
}

/// HTTP status for each outcome
pub fn outcome_status(outcome: &RedirectOutcome) -> StatusCode {
    match outcome {
        RedirectOutcome::Redirect(_) => StatusCode::OK,
        RedirectOutcome::NotFound => StatusCode::NOT_FOUND,
        RedirectOutcome::Inactive | RedirectOutcome::Expired => StatusCode::GONE,
        RedirectOutcome::NeedsCredential(_) => StatusCode::UNAUTHORIZED,
        RedirectOutcome::InvalidCredential(_) => StatusCode::FORBIDDEN,
    }
}

impl IntoResponse for RedirectOutcome {
    fn into_response(self) -> Response {
        (outcome_status(&self), Json(RedirectResponse::from(&self))).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub database: HealthStatus,
    pub cache: HealthStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Individual health status
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl HealthStatus {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            status: "healthy".to_string(),
            latency_ms: Some(latency_ms),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            status: "unhealthy".to_string(),
            latency_ms: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
            latency_ms: None,
        }
    }
}
