use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use tower_governor::key_extractor::KeyExtractor;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID wrapper for use in request extensions
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Visitor metadata the redirect handlers hand to the access recorder
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: String, client_ip: String, user_agent: Option<String>) -> Self {
        Self {
            request_id,
            client_ip,
            user_agent,
            referer: None,
        }
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    /// Build the context straight from headers, generating a request id if absent
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id = header_string(headers, REQUEST_ID_HEADER)
            .unwrap_or_else(|| RequestId::new().0);

        Self::new(request_id, extract_client_ip(headers), extract_user_agent(headers))
            .with_referer(extract_referer(headers))
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract client IP address from headers.
///
/// Only values that parse as an address (optionally with a port) are
/// accepted; anything else falls through to the next header. The result is
/// the canonical textual form, so it is bounded in length.
pub fn extract_client_ip(headers: &HeaderMap) -> String {
    // Check for X-Forwarded-For header (proxy/load balancer)
    let forwarded = header_string(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next().and_then(parse_ip));

    forwarded
        .or_else(|| header_string(headers, "x-real-ip").and_then(|v| parse_ip(&v)))
        .or_else(|| header_string(headers, "cf-connecting-ip").and_then(|v| parse_ip(&v)))
        .map(|ip| ip.to_string())
        // Fallback to a default
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Extract user agent from headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    header_string(headers, "user-agent")
}

pub fn extract_referer(headers: &HeaderMap) -> Option<String> {
    header_string(headers, "referer")
}

/// Request ID middleware - adds a unique ID to each request
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    // Try to get existing request ID from header, or generate new one
    let request_id = header_string(req.headers(), REQUEST_ID_HEADER)
        .unwrap_or_else(|| RequestId::new().0);

    // Make the id visible to extractors that only read headers
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }
    req.extensions_mut().insert(RequestId(request_id.clone()));

    tracing::info!(
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
        "Incoming request"
    );

    let mut response = next.run(req).await;

    // Add request ID to response headers
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Rate limit key: the client address as seen through proxies
#[derive(Clone)]
pub struct ClientIpKeyExtractor;

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = String;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, tower_governor::GovernorError> {
        Ok(format!("ip:{}", extract_client_ip(req.headers())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_new() {
        let id = RequestId::new();
        assert_eq!(id.as_str().len(), 36); // UUID v4 length
    }

    #[test]
    fn test_request_context_new() {
        let ctx = RequestContext::new(
            "test-123".to_string(),
            "127.0.0.1".to_string(),
            Some("Mozilla/5.0".to_string()),
        );

        assert_eq!(ctx.request_id, "test-123");
        assert_eq!(ctx.client_ip, "127.0.0.1");
        assert_eq!(ctx.user_agent, Some("Mozilla/5.0".to_string()));
        assert!(ctx.referer.is_none());
    }

    #[test]
    fn test_request_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-42".parse().unwrap());
        headers.insert("x-real-ip", "10.1.2.3".parse().unwrap());
        headers.insert("referer", "https://news.example".parse().unwrap());

        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.request_id, "req-42");
        assert_eq!(ctx.client_ip, "10.1.2.3");
        assert_eq!(ctx.referer.as_deref(), Some("https://news.example"));
        assert!(ctx.user_agent.is_none());
    }

    #[test]
    fn test_request_context_generates_id() {
        let ctx = RequestContext::from_headers(&HeaderMap::new());
        assert_eq!(ctx.request_id.len(), 36);
    }

    #[test]
    fn test_extract_client_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "192.168.1.1".parse().unwrap());

        let ip = extract_client_ip(&headers);
        assert_eq!(ip, "192.168.1.1");
    }

    #[test]
    fn test_extract_client_ip_from_multiple_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "192.168.1.1, 10.0.0.1".parse().unwrap());

        let ip = extract_client_ip(&headers);
        assert_eq!(ip, "192.168.1.1");
    }

    #[test]
    fn test_extract_client_ip_priority() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "172.16.0.9".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "172.16.0.9");

        headers.insert("x-real-ip", "10.0.0.5".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "10.0.0.5");
    }

    #[test]
    fn test_extract_client_ip_unknown() {
        let headers = HeaderMap::new();
        let ip = extract_client_ip(&headers);
        assert_eq!(ip, "unknown");
    }

    #[test]
    fn test_extract_client_ip_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "a".repeat(200).parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "unknown");

        // A bad first hop falls back to the next header
        headers.insert("x-real-ip", "203.0.113.7".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn test_extract_client_ip_normalizes() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7:443 , 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "203.0.113.7");

        headers.insert("x-forwarded-for", "2001:DB8:0:0:0:0:0:1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "2001:db8::1");

        headers.insert("x-forwarded-for", "[2001:db8::1]:8080".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "2001:db8::1");
    }
}
