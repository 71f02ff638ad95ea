//! Refresh-token exchange, shared between concurrent callers.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use log::{debug, warn};
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::hooks::{LifecycleHooks, isolate};
use crate::token::{TokenPair, TokenStore};

/// Why a refresh did not produce a usable access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RefreshFailure(pub String);

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    data: Option<RefreshData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

/// Everything one exchange needs, owned so the future can outlive its caller.
pub(crate) struct RefreshRequest {
    pub http: Client,
    pub url: String,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub refresh_token: String,
    /// Access token the exchange is meant to replace.
    pub replaces: Option<String>,
    pub tokens: Arc<dyn TokenStore>,
    pub hooks: Arc<dyn LifecycleHooks>,
}

impl RefreshRequest {
    /// Exchanges the refresh token and stores the new pair.
    ///
    /// On failure the stored credentials are cleared and `on_unauthorized`
    /// fires, once per exchange regardless of how many callers wait on it.
    async fn run(self) -> Result<String, RefreshFailure> {
        let outcome = match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(format!(
                "token refresh timed out after {}ms",
                self.timeout.as_millis()
            )),
        };

        match outcome {
            Ok(pair) => {
                let access_token = pair.access_token.clone();
                if let Err(e) = self.tokens.store_tokens(pair).await {
                    warn!("Failed to store refreshed tokens: {:#}", e);
                }
                debug!("Token refresh succeeded");
                Ok(access_token)
            }
            Err(reason) => {
                warn!("Token refresh failed: {}", reason);
                if let Err(e) = self.tokens.clear_tokens().await {
                    warn!("Failed to clear tokens: {:#}", e);
                }
                let hooks = &self.hooks;
                isolate("unauthorized", || {
                    hooks.on_unauthorized();
                    Ok(())
                });
                Err(RefreshFailure(reason))
            }
        }
    }

    async fn exchange(&self) -> Result<TokenPair, String> {
        debug!("Refreshing access token at {}...", self.url);

        let response = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&json!({ "refreshToken": self.refresh_token }))
            .send()
            .await
            .map_err(|e| format!("token refresh request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("token refresh returned HTTP {}", status.as_u16()));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid token refresh response: {}", e))?;
        let data = body
            .data
            .ok_or_else(|| "token refresh response has no data".to_string())?;

        match data.access_token.filter(|token| !token.is_empty()) {
            Some(access_token) => Ok(TokenPair {
                access_token,
                // Some backends rotate only the access token.
                refresh_token: data
                    .refresh_token
                    .unwrap_or_else(|| self.refresh_token.clone()),
                expires_at: data.expires_at,
            }),
            None => Err("token refresh response has no access token".to_string()),
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<String, RefreshFailure>>>;

/// Single-flight guard: at most one exchange per client is in flight and
/// every caller that hits a 401 meanwhile awaits that same exchange.
#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    in_flight: Mutex<Option<SharedRefresh>>,
    /// Access token whose replacement failed most recently.
    failed_token: Mutex<Option<String>>,
}

impl RefreshCoordinator {
    pub(crate) async fn refresh(
        &self,
        request: RefreshRequest,
    ) -> Result<String, RefreshFailure> {
        let replaces = request.replaces.clone();
        let shared = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let started = request.run().boxed().shared();
                    *slot = Some(started.clone());
                    started
                }
            }
        };

        let result = shared.clone().await;

        // Recorded before the slot is released, so late callers always see it.
        *self.failed_token.lock().unwrap_or_else(PoisonError::into_inner) = match &result {
            Ok(_) => None,
            Err(_) => replaces,
        };

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|in_flight| in_flight.ptr_eq(&shared))
        {
            *slot = None;
        }
        result
    }

    /// True when the latest exchange that tried to replace `access_token` failed
    /// and already reported it through `on_unauthorized`.
    pub(crate) fn failed_for(&self, access_token: Option<&str>) -> bool {
        access_token.is_some_and(|token| {
            self.failed_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_deref()
                == Some(token)
        })
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
