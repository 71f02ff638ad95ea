//! API client with timeouts, retry with backoff, bearer authentication and
//! refresh-and-replay on 401.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use super::error::{ApiError, RequestError};
use super::refresh::{RefreshCoordinator, RefreshFailure, RefreshRequest};
use super::request::{RequestOptions, build_headers, build_url, requires_csrf};
use super::retry::should_retry;
use crate::cache::ResponseCache;
use crate::config::ClientConfig;
use crate::hooks::{RequestInfo, ResponseInfo, isolate};
use crate::rate_limit::RateLimiter;
use crate::token::TokenStore;

/// A response whose body has been read and leniently parsed.
struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    data: Value,
}

/// Authenticated client for the platform API.
///
/// Cheap to clone; clones share the token store, cache, rate limiter and the
/// in-flight token refresh.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    config: ClientConfig,
    tokens: Arc<dyn TokenStore>,
    cache: ResponseCache,
    limiter: Option<RateLimiter>,
    refresh: RefreshCoordinator,
}

impl ApiClient {
    /// Creates a client with its own connection pool.
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_http_client(client, config, tokens))
    }

    /// Creates a client on top of an existing reqwest Client.
    pub fn with_http_client(
        client: Client,
        config: ClientConfig,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let limiter = config
            .rate_limiting
            .then(|| RateLimiter::new(config.rate_limit));
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                tokens,
                cache: ResponseCache::new(),
                limiter,
                refresh: RefreshCoordinator::default(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Performs a request and deserializes the JSON response.
    ///
    /// Failures carry a [`RequestError`]; use `downcast_ref` to branch on it.
    #[tracing::instrument(skip(self, options), fields(method = %options.method))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.execute(endpoint, &options).await?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to parse JSON response from {}", endpoint))
    }

    #[tracing::instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::get()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_with_params<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let options = params
            .iter()
            .fold(RequestOptions::get(), |options, (key, value)| {
                options.param(*key, value)
            });
        self.request(endpoint, options).await
    }

    #[tracing::instrument(skip(self, body))]
    pub async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::POST, endpoint, body).await
    }

    #[tracing::instrument(skip(self, body))]
    pub async fn put<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PUT, endpoint, body).await
    }

    #[tracing::instrument(skip(self, body))]
    pub async fn patch<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PATCH, endpoint, body).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::new(Method::DELETE)).await
    }

    async fn send_json<T, B>(&self, method: Method, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body).context("Failed to serialize request body")?;
        self.request(endpoint, RequestOptions::new(method).json(body)).await
    }

    async fn execute(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<Value, RequestError> {
        let config = &self.inner.config;
        let url = build_url(&config.base_url, endpoint, &options.params);

        let cacheable = self.is_cacheable(options);
        if cacheable {
            if let Some(hit) = self.inner.cache.get(&url) {
                debug!("Serving {} from cache", url);
                return Ok(hit);
            }
        }

        let value = self.execute_with_retry(endpoint, &url, options).await?;

        if cacheable {
            let ttl = options.cache_ttl.unwrap_or(config.default_cache_ttl);
            self.inner.cache.insert(&url, value.clone(), ttl);
        }
        Ok(value)
    }

    fn is_cacheable(&self, options: &RequestOptions) -> bool {
        options.method == Method::GET && options.cache.unwrap_or(self.inner.config.caching)
    }

    /// Runs attempts `0..=retries`, one after another.
    async fn execute_with_retry(
        &self,
        path: &str,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Value, RequestError> {
        let config = &self.inner.config;
        let mut attempt: u32 = 0;

        loop {
            let access_token = self.access_token().await;
            let headers = self.headers_for(options, access_token.as_deref()).await?;

            let error = match self.dispatch(path, url, options, headers).await {
                Ok(response) if response.status.is_success() => return Ok(self.accept(response)),
                Ok(response) if response.status == StatusCode::UNAUTHORIZED => {
                    if attempt == 0 {
                        debug!("{}: received 401, refreshing credentials", path);
                        return self
                            .refresh_and_replay(path, url, options, access_token)
                            .await;
                    }
                    // One refresh per call; a later 401 is final.
                    self.reject(response, path);
                    self.notify_unauthorized();
                    return Err(RequestError::AuthenticationRequired {
                        reason: format!("{} returned 401 on attempt {}", path, attempt + 1),
                    });
                }
                Ok(response) => self.reject(response, path),
                Err(e) => e,
            };

            if !should_retry(&error) {
                debug!("{}: non-retryable error: {}", path, error);
                return Err(error);
            }
            if attempt >= config.retries {
                warn!(
                    "{}: giving up after {} attempts: {}",
                    path,
                    attempt + 1,
                    error
                );
                return Err(error);
            }

            let delay = config.backoff.delay_for(attempt);
            warn!(
                "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                path,
                attempt + 1,
                config.retries + 1,
                error,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Sends one attempt and reads its body, bounded by the configured timeout.
    async fn dispatch(
        &self,
        path: &str,
        url: &str,
        options: &RequestOptions,
        headers: HeaderMap,
    ) -> Result<RawResponse, RequestError> {
        let config = &self.inner.config;

        if let Some(limiter) = &self.inner.limiter {
            limiter.acquire().await;
        }

        let info = RequestInfo {
            url: url.to_string(),
            method: options.method.clone(),
            headers: headers.clone(),
        };
        for interceptor in &config.interceptors {
            isolate("request interceptor", || interceptor.on_request(&info));
        }

        let mut builder = self
            .inner
            .client
            .request(options.method.clone(), url)
            .headers(headers);
        if let Some(body) = &options.body {
            builder = body.apply(builder);
        }

        match tokio::time::timeout(config.timeout, read_response(builder, path)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{}: request timed out after {}ms",
                    path,
                    config.timeout.as_millis()
                );
                Err(RequestError::Timeout {
                    path: path.to_string(),
                    timeout: config.timeout,
                })
            }
        }
    }

    /// Hands a successful response to the interceptors and returns its body.
    fn accept(&self, response: RawResponse) -> Value {
        let info = ResponseInfo {
            status: response.status,
            data: response.data,
        };
        for interceptor in &self.inner.config.interceptors {
            isolate("response interceptor", || interceptor.on_response(&info));
        }
        info.data
    }

    /// Normalizes an HTTP failure and reports it through `on_error`.
    fn reject(&self, response: RawResponse, path: &str) -> RequestError {
        let api_error = ApiError::from_response(response.status, &response.data, path);
        let hooks = &self.inner.config.hooks;
        isolate("error", || {
            hooks.on_error(&api_error);
            Ok(())
        });

        RequestError::Http {
            status: response.status,
            code: api_error.code.clone(),
            data: response.data,
            headers: response.headers,
            api_error,
        }
    }

    fn notify_unauthorized(&self) {
        let hooks = &self.inner.config.hooks;
        isolate("unauthorized", || {
            hooks.on_unauthorized();
            Ok(())
        });
    }

    /// Renews credentials and replays the request exactly once, outside the retry loop.
    async fn refresh_and_replay(
        &self,
        path: &str,
        url: &str,
        options: &RequestOptions,
        used_token: Option<String>,
    ) -> Result<Value, RequestError> {
        if !self.inner.config.auth.auto_refresh {
            self.notify_unauthorized();
            return Err(RequestError::AuthenticationRequired {
                reason: "automatic token refresh is disabled".to_string(),
            });
        }

        let access_token = self.refreshed_access_token(used_token.as_deref()).await?;
        let headers = self.headers_for(options, Some(&access_token)).await?;

        debug!("{}: replaying request with refreshed token", path);
        let error = match self.dispatch(path, url, options, headers).await {
            Ok(response) if response.status.is_success() => return Ok(self.accept(response)),
            Ok(response) => self.reject(response, path),
            Err(error) => error,
        };

        // Whatever broke the replay, the session could not be recovered.
        warn!("{}: replay after token refresh failed: {}", path, error);
        self.notify_unauthorized();
        Err(RequestError::RetryAfterRefreshFailed {
            source: Box::new(error),
        })
    }

    async fn refreshed_access_token(
        &self,
        used_token: Option<&str>,
    ) -> Result<String, RequestError> {
        // Another call may have rotated the token while this one was in flight.
        if let Some(current) = self.access_token().await {
            if used_token != Some(current.as_str()) {
                debug!("Access token already rotated, skipping refresh");
                return Ok(current);
            }
        }

        let Some(refresh_token) = self.refresh_token().await else {
            // A concurrent call whose refresh of this same token just failed has
            // already notified.
            if !self.inner.refresh.failed_for(used_token) {
                self.notify_unauthorized();
            }
            return Err(RequestError::AuthenticationRequired {
                reason: "no refresh token available".to_string(),
            });
        };

        let config = &self.inner.config;
        let request = RefreshRequest {
            http: self.inner.client.clone(),
            url: format!("{}{}", config.base_url, config.auth.refresh_endpoint),
            headers: build_headers(config, &RequestOptions::post(), None, None)?,
            timeout: config.timeout,
            refresh_token,
            replaces: used_token.map(str::to_string),
            tokens: Arc::clone(&self.inner.tokens),
            hooks: Arc::clone(&config.hooks),
        };

        self.inner
            .refresh
            .refresh(request)
            .await
            .map_err(|RefreshFailure(reason)| RequestError::AuthenticationRequired { reason })
    }

    async fn headers_for(
        &self,
        options: &RequestOptions,
        access_token: Option<&str>,
    ) -> Result<HeaderMap, RequestError> {
        let config = &self.inner.config;
        let csrf_token = if config.csrf && requires_csrf(&options.method) {
            self.csrf_token().await
        } else {
            None
        };
        build_headers(config, options, access_token, csrf_token.as_deref())
    }

    async fn access_token(&self) -> Option<String> {
        self.inner.tokens.access_token().await.unwrap_or_else(|e| {
            warn!("Failed to read access token: {:#}", e);
            None
        })
    }

    async fn refresh_token(&self) -> Option<String> {
        self.inner.tokens.refresh_token().await.unwrap_or_else(|e| {
            warn!("Failed to read refresh token: {:#}", e);
            None
        })
    }

    async fn csrf_token(&self) -> Option<String> {
        self.inner.tokens.csrf_token().await.unwrap_or_else(|e| {
            warn!("Failed to read CSRF token: {:#}", e);
            None
        })
    }
}

async fn read_response(builder: RequestBuilder, path: &str) -> Result<RawResponse, RequestError> {
    let response = builder.send().await.map_err(|source| {
        if source.is_builder() {
            RequestError::InvalidRequest(source.to_string())
        } else {
            RequestError::Network {
                path: path.to_string(),
                source,
            }
        }
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|source| RequestError::Body {
        path: path.to_string(),
        source,
    })?;

    Ok(RawResponse {
        status,
        headers,
        data: parse_body(&body),
    })
}

/// Empty and non-JSON bodies read as `{}`.
fn parse_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}
