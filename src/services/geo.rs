//! IP geolocation used to enrich access logs.

use crate::config::GeoIpConfig;
use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub timezone: Option<String>,
}

#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Lookup failures are logged by the implementation and surface as `None`.
    async fn lookup(&self, ip: &str) -> Option<GeoInfo>;

    fn name(&self) -> &'static str;
}

/// Used when geolocation is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGeoLookup;

#[async_trait]
impl GeoLookup for NoopGeoLookup {
    async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
        None
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// ip-api.com style JSON response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
    region_name: Option<String>,
    timezone: Option<String>,
}

/// Queries an HTTP API. `{ip}` in the template is replaced by the address.
pub struct HttpGeoLookup {
    client: reqwest::Client,
    url_template: String,
}

impl HttpGeoLookup {
    pub fn new(url_template: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: url_template.to_string(),
        })
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        if !is_public_address(ip) {
            debug!("GeoIP: skipping non-public address {}", ip);
            return None;
        }

        let url = self.url_template.replace("{ip}", ip);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("GeoIP request to \"{}\" failed: {}", url, e);
                return None;
            }
        };

        let body: ApiResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!("GeoIP response from \"{}\" could not be parsed: {}", url, e);
                return None;
            }
        };

        if body.status.as_deref().is_some_and(|s| s != "success") {
            debug!("GeoIP: no result for {}", ip);
            return None;
        }

        Some(GeoInfo {
            country: body.country_code,
            city: body.city,
            region: body.region_name,
            timezone: body.timezone,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Per-address cache in front of another lookup. Misses are cached too, and
/// concurrent lookups of one address share a single upstream call.
pub struct CachedGeoLookup {
    inner: Arc<dyn GeoLookup>,
    cache: Cache<String, Option<GeoInfo>>,
}

impl CachedGeoLookup {
    pub fn new(inner: Arc<dyn GeoLookup>, ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .build();

        Self { inner, cache }
    }
}

#[async_trait]
impl GeoLookup for CachedGeoLookup {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        self.cache
            .get_with(ip.to_string(), async {
                debug!("GeoIP cache miss for {}", ip);
                self.inner.lookup(ip).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Loopback, private, link-local and unparsable addresses have no location.
pub fn is_public_address(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        Ok(IpAddr::V6(v6)) => {
            let unique_local = (v6.segments()[0] & 0xfe00) == 0xfc00;
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
        Err(_) => false,
    }
}

/// Build the configured provider, falling back to no enrichment.
pub fn build_geo_lookup(config: &GeoIpConfig) -> Arc<dyn GeoLookup> {
    if !config.enabled {
        return Arc::new(NoopGeoLookup);
    }

    match HttpGeoLookup::new(&config.api_url, Duration::from_millis(config.timeout_ms)) {
        Ok(provider) => {
            info!(
                ttl_seconds = config.cache_ttl_seconds,
                capacity = config.cache_capacity,
                "GeoIP: using cached HTTP provider"
            );
            Arc::new(CachedGeoLookup::new(
                Arc::new(provider),
                Duration::from_secs(config.cache_ttl_seconds),
                config.cache_capacity,
            ))
        }
        Err(e) => {
            warn!("GeoIP: failed to build HTTP client ({}), enrichment disabled", e);
            Arc::new(NoopGeoLookup)
        }
    }
}
