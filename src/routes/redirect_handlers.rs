use crate::error::{AppError, AppResult};
use crate::middleware_impls::RequestContext;
use crate::models::RedirectRequest;
use crate::rate_limit::{AttemptLimiter, AttemptStatus};
use crate::services::resolver::{RedirectOutcome, Visitor};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Redirect, Response};
use std::sync::Arc;
use validator::Validate;

use super::types::RedirectResponse;
use super::AppState;

/// Resolve a short link, optionally with a password in the JSON body
pub async fn resolve_redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let payload = parse_body(&body)?;
    payload
        .validate()
        .map_err(|e| AppError::InvalidRequest(format!("Validation failed: {}", e)))?;

    resolve(&state, &code, payload.password.as_deref(), &headers)
        .await
        .map(|resolution| resolution.into_response())
}

/// Browser convenience: resolve without a credential and follow the redirect
pub async fn follow_redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    match resolve(&state, &code, None, &headers).await? {
        Resolution::Outcome(RedirectOutcome::Redirect(target_url)) => {
            Ok(Redirect::temporary(&target_url).into_response())
        }
        other => Ok(other.into_response()),
    }
}

enum Resolution {
    Outcome(RedirectOutcome),
    Blocked(i64),
}

impl IntoResponse for Resolution {
    fn into_response(self) -> Response {
        match self {
            Resolution::Outcome(outcome) => outcome.into_response(),
            Resolution::Blocked(retry_after_seconds) => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(RedirectResponse::too_many_attempts(retry_after_seconds)),
            )
                .into_response(),
        }
    }
}

async fn resolve(
    state: &AppState,
    code: &str,
    password: Option<&str>,
    headers: &HeaderMap,
) -> AppResult<Resolution> {
    let ctx = RequestContext::from_headers(headers);
    let now = state.clock.now();
    let key = AttemptLimiter::key(code, &ctx.client_ip);

    if let AttemptStatus::Blocked {
        retry_after_seconds,
    } = state.attempt_limiter.check(&key, now)
    {
        return Ok(Resolution::Blocked(retry_after_seconds));
    }

    let visitor = Visitor {
        ip_address: ctx.client_ip,
        user_agent: ctx.user_agent,
        referer: ctx.referer,
        request_id: Some(ctx.request_id),
    };
    let outcome = state.resolver.resolve(code, password, now, &visitor).await?;

    match &outcome {
        RedirectOutcome::InvalidCredential(_) => {
            state.attempt_limiter.record_failure(&key, now);
        }
        RedirectOutcome::Redirect(_) => state.attempt_limiter.reset(&key),
        _ => {}
    }

    Ok(Resolution::Outcome(outcome))
}

/// An empty body means "no credential"
fn parse_body(body: &[u8]) -> AppResult<RedirectRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RedirectRequest::default());
    }

    serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_body() {
        assert!(parse_body(b"").unwrap().password.is_none());
        assert!(parse_body(b"  \n").unwrap().password.is_none());
    }

    #[test]
    fn test_parse_password_body() {
        let payload = parse_body(br#"{"password":"hunter2"}"#).unwrap();
        assert_eq!(payload.password.as_deref(), Some("hunter2"));

        let payload = parse_body(br#"{"password":null}"#).unwrap();
        assert!(payload.password.is_none());
    }

    #[test]
    fn test_parse_malformed_body() {
        assert!(matches!(parse_body(b"{nope"), Err(AppError::InvalidRequest(_))));
    }
}
