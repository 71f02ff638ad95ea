//! Request/response interceptors and client lifecycle callbacks.
//!
//! Hooks are side channels. Whatever a hook does, including returning an error
//! or panicking, the request pipeline continues as if it had returned normally.

use anyhow::Result;
use log::{debug, warn};
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::http::ApiError;

/// What an interceptor sees before an attempt is sent.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
}

/// What an interceptor sees after a successful response.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: StatusCode,
    pub data: Value,
}

/// Observes outgoing requests and successful responses.
pub trait Interceptor: Send + Sync {
    fn on_request(&self, _request: &RequestInfo) -> Result<()> {
        Ok(())
    }

    fn on_response(&self, _response: &ResponseInfo) -> Result<()> {
        Ok(())
    }
}

/// Callbacks fired on irrecoverable authentication failures and HTTP errors.
pub trait LifecycleHooks: Send + Sync {
    /// Credentials are gone and could not be renewed.
    fn on_unauthorized(&self) {}

    /// A request failed with an HTTP error status.
    fn on_error(&self, _error: &ApiError) {}
}

/// Logs errors and asks the user to sign in again on unauthorized.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl LifecycleHooks for DefaultHooks {
    fn on_unauthorized(&self) {
        warn!("Session expired or missing. Run `portal-client login` to sign in again.");
    }

    fn on_error(&self, error: &ApiError) {
        debug!("API error: {}", error);
    }
}

/// Runs a hook behind an isolation boundary: errors and panics are logged and dropped.
pub(crate) fn isolate<F>(hook: &str, f: F)
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{} hook failed: {:#}", hook, e),
        Err(_) => warn!("{} hook panicked, ignoring", hook),
    }
}
