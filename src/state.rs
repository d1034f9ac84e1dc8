use crate::cache::Cache;
use crate::clock::Clock;
use crate::rate_limit::AttemptLimiter;
use crate::services::resolver::RedirectResolver;
use crate::store::LinkStore;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Wrapped in `Arc` and handed to handlers via Axum's State extraction.
#[derive(Clone)]
pub struct AppState {
    /// Link storage, possibly behind the snapshot cache
    pub store: Arc<dyn LinkStore>,

    /// Raw cache handle, only used for health checks
    pub cache: Option<Cache>,

    pub resolver: Arc<RedirectResolver>,

    /// Invalid-credential attempts per code and client address
    pub attempt_limiter: Arc<AttemptLimiter>,

    /// Source of "now" for every resolution
    pub clock: Arc<dyn Clock>,
}
