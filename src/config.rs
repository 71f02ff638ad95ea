use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::hooks::{DefaultHooks, Interceptor, LifecycleHooks};
use crate::http::{BackoffPolicy, DEFAULT_RETRIES};
use crate::rate_limit::RateLimit;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_TOKEN_HEADER: &str = "Authorization";
pub const DEFAULT_REFRESH_ENDPOINT: &str = "/auth/refresh";

/// How the client authenticates and renews credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Header that carries the bearer token.
    pub token_header: String,
    /// Path, relative to the base URL, of the refresh-token exchange.
    pub refresh_endpoint: String,
    /// Whether a 401 triggers a refresh-and-replay.
    pub auto_refresh: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            refresh_endpoint: DEFAULT_REFRESH_ENDPOINT.to_string(),
            auto_refresh: true,
        }
    }
}

/// Settings fixed for the lifetime of an [`ApiClient`](crate::http::ApiClient).
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: BackoffPolicy,
    pub rate_limiting: bool,
    pub rate_limit: RateLimit,
    pub caching: bool,
    pub default_cache_ttl: Duration,
    pub csrf: bool,
    pub auth: AuthConfig,
    pub tenant_id: Option<String>,
    pub portal: Option<String>,
    pub user_agent: String,
    pub hooks: Arc<dyn LifecycleHooks>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ClientConfig {
    /// Defaults for everything except the base URL. A trailing `/` is dropped
    /// so endpoints can always start with one.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            default_headers: vec![("Accept".to_string(), "application/json".to_string())],
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            backoff: BackoffPolicy::default(),
            rate_limiting: false,
            rate_limit: RateLimit::default(),
            caching: false,
            default_cache_ttl: DEFAULT_CACHE_TTL,
            csrf: true,
            auth: AuthConfig::default(),
            tenant_id: None,
            portal: None,
            user_agent: format!("portal-client/{}", env!("PORTAL_CLIENT_VERSION")),
            hooks: Arc::new(DefaultHooks),
            interceptors: Vec::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limiting = true;
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_caching(mut self, default_ttl: Duration) -> Self {
        self.caching = true;
        self.default_cache_ttl = default_ttl;
        self
    }

    pub fn with_csrf(mut self, csrf: bool) -> Self {
        self.csrf = csrf;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_portal(mut self, portal: impl Into<String>) -> Self {
        self.portal = Some(portal.into());
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("default_headers", &self.default_headers)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("backoff", &self.backoff)
            .field("rate_limiting", &self.rate_limiting)
            .field("rate_limit", &self.rate_limit)
            .field("caching", &self.caching)
            .field("default_cache_ttl", &self.default_cache_ttl)
            .field("csrf", &self.csrf)
            .field("auth", &self.auth)
            .field("tenant_id", &self.tenant_id)
            .field("portal", &self.portal)
            .field("user_agent", &self.user_agent)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}
