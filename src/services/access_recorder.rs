use crate::error::AppResult;
use crate::models::{AccessLogEntry, AccessRequest};
use crate::services::geo::{GeoInfo, GeoLookup};
use crate::services::user_agent;
use crate::store::LinkStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Extension key carrying the originating request id
pub const EXTRA_REQUEST_ID: &str = "request_id";

/// Turns raw request data into an immutable access log entry and stores it.
/// Never touches the link itself; click counting is a separate job.
#[derive(Clone)]
pub struct AccessRecorder {
    store: Arc<dyn LinkStore>,
    geo: Arc<dyn GeoLookup>,
}

impl AccessRecorder {
    pub fn new(store: Arc<dyn LinkStore>, geo: Arc<dyn GeoLookup>) -> Self {
        Self { store, geo }
    }

    pub async fn record(&self, request: &AccessRequest) -> AppResult<AccessLogEntry> {
        let entry = self.prepare(request).await;
        self.persist(&entry).await?;
        Ok(entry)
    }

    /// Enrich the request into its final entry. The entry id is fixed here,
    /// so storing the same entry again cannot produce a second row.
    pub async fn prepare(&self, request: &AccessRequest) -> AccessLogEntry {
        let geo = self.geo.lookup(&request.ip_address).await;
        build_entry(request, geo)
    }

    pub async fn persist(&self, entry: &AccessLogEntry) -> AppResult<()> {
        self.store.create_access_log_entry(entry).await
    }
}

/// Derive the log entry from the request; pure apart from the generated id.
pub fn build_entry(request: &AccessRequest, geo: Option<GeoInfo>) -> AccessLogEntry {
    let parsed = user_agent::parse(request.user_agent.as_deref().unwrap_or_default());
    let geo = geo.unwrap_or_default();

    let mut extra = BTreeMap::new();
    if let Some(request_id) = &request.request_id {
        extra.insert(EXTRA_REQUEST_ID.to_string(), request_id.clone());
    }

    AccessLogEntry {
        id: Uuid::new_v4(),
        shortlink_id: request.shortlink_id,
        ip_address: request.ip_address.clone(),
        user_agent: request.user_agent.clone(),
        referer: request.referer.clone(),
        device_type: parsed.device_type,
        browser: parsed.browser,
        os: parsed.os,
        country: geo.country,
        city: geo.city,
        region: geo.region,
        timezone: geo.timezone,
        extra,
        created_at: request.occurred_at,
    }
}
