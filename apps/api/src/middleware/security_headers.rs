//! Security headers applied to every response, including error responses
//!
//! - `X-Frame-Options: DENY`
//! - `X-XSS-Protection: 0` (the legacy filter is disabled; CSP replaces it)
//! - `X-Content-Type-Options: nosniff`
//! - `Referrer-Policy: strict-origin-when-cross-origin`
//! - `Content-Security-Policy`: same-origin only, no plugins, no framing
//! - `Permissions-Policy`: camera, microphone, geolocation, payment, usb off
//! - `Strict-Transport-Security` when enabled and the request arrived over HTTPS

use axum::{
    extract::{Request, State},
    http::{header::HeaderName, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

static X_FRAME_OPTIONS: HeaderName = HeaderName::from_static("x-frame-options");
static X_XSS_PROTECTION: HeaderName = HeaderName::from_static("x-xss-protection");
static X_CONTENT_TYPE_OPTIONS: HeaderName = HeaderName::from_static("x-content-type-options");
static REFERRER_POLICY: HeaderName = HeaderName::from_static("referrer-policy");
static CONTENT_SECURITY_POLICY: HeaderName = HeaderName::from_static("content-security-policy");
static PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");
static STRICT_TRANSPORT_SECURITY: HeaderName = HeaderName::from_static("strict-transport-security");

const CONTENT_SECURITY_POLICY_VALUE: &str = "default-src 'self'; \
     script-src 'self'; \
     style-src 'self'; \
     img-src 'self' data: https:; \
     connect-src 'self'; \
     font-src 'self'; \
     object-src 'none'; \
     base-uri 'self'; \
     form-action 'self'; \
     frame-ancestors 'none'";

const PERMISSIONS_POLICY_VALUE: &str = "camera=(), microphone=(), geolocation=(), payment=(), usb=()";

/// Configuration for the security headers middleware
#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    /// Send `Strict-Transport-Security` on HTTPS requests
    pub enable_hsts: bool,

    /// HSTS max-age in seconds (default: 1 year)
    pub hsts_max_age: u64,

    pub hsts_include_subdomains: bool,

    /// Only set once the domain is ready for the preload list
    pub hsts_preload: bool,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enable_hsts: false,
            hsts_max_age: 31_536_000,
            hsts_include_subdomains: true,
            hsts_preload: false,
        }
    }
}

impl SecurityHeadersConfig {
    /// HSTS on, one year, subdomains included, no preload
    pub fn production() -> Self {
        Self {
            enable_hsts: true,
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self::default()
    }

    pub fn with_hsts(mut self, enable_hsts: bool) -> Self {
        self.enable_hsts = enable_hsts;
        self
    }

    pub fn with_preload(mut self) -> Self {
        self.hsts_preload = true;
        self
    }

    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.hsts_max_age = seconds;
        self
    }

    fn build_hsts_value(&self) -> String {
        let mut value = format!("max-age={}", self.hsts_max_age);

        if self.hsts_include_subdomains {
            value.push_str("; includeSubDomains");
        }

        if self.hsts_preload {
            value.push_str("; preload");
        }

        value
    }
}

/// Security headers middleware
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(middleware::from_fn_with_state(
///         SecurityHeadersConfig::production(),
///         security_headers,
///     ));
/// ```
pub async fn security_headers(
    State(config): State<SecurityHeadersConfig>,
    request: Request,
    next: Next,
) -> Response {
    let is_https = is_https_request(&request);

    let mut response = next.run(request).await;
    apply_security_headers(response.headers_mut(), &config, is_https);
    response
}

/// HTTPS as reported by a TLS-terminating proxy, or by the request scheme
fn is_https_request(request: &Request) -> bool {
    if let Some(proto) = request.headers().get("x-forwarded-proto") {
        if let Ok(proto_str) = proto.to_str() {
            return proto_str.eq_ignore_ascii_case("https");
        }
    }

    request
        .uri()
        .scheme_str()
        .is_some_and(|s| s.eq_ignore_ascii_case("https"))
}

fn apply_security_headers(headers: &mut HeaderMap, config: &SecurityHeadersConfig, is_https: bool) {
    headers.insert(X_FRAME_OPTIONS.clone(), HeaderValue::from_static("DENY"));
    headers.insert(X_XSS_PROTECTION.clone(), HeaderValue::from_static("0"));
    headers.insert(
        X_CONTENT_TYPE_OPTIONS.clone(),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        REFERRER_POLICY.clone(),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        CONTENT_SECURITY_POLICY.clone(),
        HeaderValue::from_static(CONTENT_SECURITY_POLICY_VALUE),
    );
    headers.insert(
        PERMISSIONS_POLICY.clone(),
        HeaderValue::from_static(PERMISSIONS_POLICY_VALUE),
    );

    // RFC 6797: HSTS on plain HTTP responses is ignored by browsers.
    if config.enable_hsts && is_https {
        if let Ok(value) = HeaderValue::from_str(&config.build_hsts_value()) {
            headers.insert(STRICT_TRANSPORT_SECURITY.clone(), value);
        }
    }
}
