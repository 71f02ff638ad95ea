//! Request options and the URL/header assembly shared by every attempt.

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use url::form_urlencoded;

use super::error::RequestError;
use crate::config::ClientConfig;

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const TENANT_HEADER: &str = "X-Tenant-ID";
pub const PORTAL_HEADER: &str = "X-Portal";
pub const CSRF_TOKEN_HEADER: &str = "X-CSRF-Token";
pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";

/// Payload of a request. Everything except `Json` is sent as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
    Bytes {
        data: Vec<u8>,
        content_type: Option<String>,
    },
    Text(String),
}

impl RequestBody {
    pub(crate) fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Bytes { data, content_type } => {
                let builder = match content_type {
                    Some(content_type) => builder.header(CONTENT_TYPE, content_type),
                    None => builder,
                };
                builder.body(data.clone())
            }
            RequestBody::Text(text) => builder.body(text.clone()),
        }
    }
}

/// Per-call options for [`ApiClient::request`](super::ApiClient::request).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Query parameters in order; `None` values are left out of the URL.
    pub params: Vec<(String, Option<String>)>,
    /// Overrides the client-wide caching switch for this call.
    pub cache: Option<bool>,
    pub cache_ttl: Option<Duration>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn json(self, value: Value) -> Self {
        self.body(RequestBody::Json(value))
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), Some(value.to_string())));
        self
    }

    pub fn param_opt<V: ToString>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        self.params.push((key.into(), value.map(|v| v.to_string())));
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = Some(enabled);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Joins base URL and endpoint and appends the encoded query string, if any.
pub fn build_url(base_url: &str, endpoint: &str, params: &[(String, Option<String>)]) -> String {
    let mut url = format!("{}{}", base_url, endpoint);

    let mut query = form_urlencoded::Serializer::new(String::new());
    let mut has_query = false;
    for (key, value) in params {
        if let Some(value) = value {
            query.append_pair(key, value);
            has_query = true;
        }
    }

    if has_query {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query.finish());
    }
    url
}

/// Methods that change server state and therefore carry CSRF headers.
pub fn requires_csrf(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// `Bearer <token>`, unless the stored token already carries the scheme.
pub fn bearer_value(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

/// Assembles the headers for one attempt.
///
/// Later entries win: defaults, auth, API key, tenant/portal, CSRF, then the
/// caller's own headers.
pub fn build_headers(
    config: &ClientConfig,
    options: &RequestOptions,
    access_token: Option<&str>,
    csrf_token: Option<&str>,
) -> Result<HeaderMap, RequestError> {
    let mut headers = HeaderMap::new();

    for (name, value) in &config.default_headers {
        insert(&mut headers, name, value, false)?;
    }

    if let Some(token) = access_token {
        insert(&mut headers, &config.auth.token_header, &bearer_value(token), true)?;
    }
    if let Some(api_key) = &config.api_key {
        insert(&mut headers, API_KEY_HEADER, api_key, true)?;
    }
    if let Some(tenant_id) = &config.tenant_id {
        insert(&mut headers, TENANT_HEADER, tenant_id, false)?;
    }
    if let Some(portal) = &config.portal {
        insert(&mut headers, PORTAL_HEADER, portal, false)?;
    }

    if config.csrf && requires_csrf(&options.method) {
        insert(&mut headers, REQUESTED_WITH_HEADER, "XMLHttpRequest", false)?;
        if let Some(csrf_token) = csrf_token {
            insert(&mut headers, CSRF_TOKEN_HEADER, csrf_token, true)?;
        }
    }

    for (name, value) in &options.headers {
        insert(&mut headers, name, value, false)?;
    }

    Ok(headers)
}

fn insert(
    headers: &mut HeaderMap,
    name: &str,
    value: &str,
    sensitive: bool,
) -> Result<(), RequestError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| RequestError::InvalidRequest(format!("invalid header name '{}'", name)))?;
    let mut header_value = HeaderValue::from_str(value)
        .map_err(|_| RequestError::InvalidRequest(format!("invalid value for header '{}'", name)))?;
    header_value.set_sensitive(sensitive);
    headers.insert(header_name, header_value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;

    fn params(pairs: &[(&str, Option<&str>)]) -> Vec<(String, Option<String>)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_build_url_without_params() {
        assert_eq!(
            build_url("http://api", "/subscribers", &[]),
            "http://api/subscribers"
        );
    }

    #[test]
    fn test_build_url_omits_missing_values() {
        let url = build_url(
            "http://api",
            "/subscribers",
            &params(&[("status", None), ("plan", None)]),
        );
        assert_eq!(url, "http://api/subscribers");
    }

    #[test]
    fn test_build_url_encodes_values() {
        let url = build_url(
            "http://api",
            "/subscribers",
            &params(&[
                ("q", Some("jane doe&co")),
                ("skip", None),
                ("page", Some("2")),
            ]),
        );
        assert_eq!(url, "http://api/subscribers?q=jane+doe%26co&page=2");
    }

    #[test]
    fn test_build_url_extends_existing_query() {
        let url = build_url("http://api", "/invoices?year=2024", &params(&[("month", Some("5"))]));
        assert_eq!(url, "http://api/invoices?year=2024&month=5");
    }

    #[test]
    fn test_requires_csrf() {
        assert!(requires_csrf(&Method::POST));
        assert!(requires_csrf(&Method::PUT));
        assert!(requires_csrf(&Method::PATCH));
        assert!(requires_csrf(&Method::DELETE));
        assert!(!requires_csrf(&Method::GET));
        assert!(!requires_csrf(&Method::HEAD));
        assert!(!requires_csrf(&Method::OPTIONS));
    }

    #[test]
    fn test_bearer_value_is_not_doubled() {
        assert_eq!(bearer_value("abc"), "Bearer abc");
        assert_eq!(bearer_value("Bearer abc"), "Bearer abc");
    }

    #[test]
    fn test_build_headers_full() {
        let config = ClientConfig::new("http://api")
            .with_api_key("key-1")
            .with_tenant("t-9")
            .with_portal("admin");
        let options = RequestOptions::post().header("X-Trace", "abc");

        let headers = build_headers(&config, &options, Some("tok"), Some("csrf-1")).unwrap();

        assert_eq!(headers[AUTHORIZATION], "Bearer tok");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert_eq!(headers[API_KEY_HEADER], "key-1");
        assert_eq!(headers[TENANT_HEADER], "t-9");
        assert_eq!(headers[PORTAL_HEADER], "admin");
        assert_eq!(headers[REQUESTED_WITH_HEADER], "XMLHttpRequest");
        assert_eq!(headers[CSRF_TOKEN_HEADER], "csrf-1");
        assert_eq!(headers["X-Trace"], "abc");
        assert_eq!(headers["Accept"], "application/json");
    }

    #[test]
    fn test_build_headers_get_has_no_csrf() {
        let config = ClientConfig::new("http://api");
        let headers =
            build_headers(&config, &RequestOptions::get(), None, Some("csrf-1")).unwrap();

        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(headers.get(REQUESTED_WITH_HEADER).is_none());
        assert!(headers.get(CSRF_TOKEN_HEADER).is_none());
    }

    #[test]
    fn test_build_headers_csrf_disabled() {
        let config = ClientConfig::new("http://api").with_csrf(false);
        let headers = build_headers(&config, &RequestOptions::post(), None, Some("c")).unwrap();
        assert!(headers.get(REQUESTED_WITH_HEADER).is_none());
    }

    #[test]
    fn test_build_headers_custom_token_header() {
        let mut config = ClientConfig::new("http://api");
        config.auth.token_header = "X-Auth-Token".to_string();
        let headers = build_headers(&config, &RequestOptions::get(), Some("tok"), None).unwrap();

        assert_eq!(headers["X-Auth-Token"], "Bearer tok");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_request_headers_override_defaults() {
        let config = ClientConfig::new("http://api");
        let options = RequestOptions::get().header("Accept", "text/csv");
        let headers = build_headers(&config, &options, None, None).unwrap();
        assert_eq!(headers["Accept"], "text/csv");
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let config = ClientConfig::new("http://api");
        let options = RequestOptions::get().header("Bad Header", "x");
        let err = build_headers(&config, &options, None, None).unwrap_err();
        assert!(matches!(err, RequestError::InvalidRequest(_)));
    }

    #[test]
    fn test_param_opt() {
        let options = RequestOptions::get()
            .param("page", 1)
            .param_opt("status", None::<&str>)
            .param_opt("plan", Some("fiber"));
        assert_eq!(
            options.params,
            params(&[("page", Some("1")), ("status", None), ("plan", Some("fiber"))])
        );
    }
}
