//! Access/refresh token storage.
//!
//! The client never persists credentials itself. It reads and rotates them
//! through a [`TokenStore`].
//!
//! # Structure
//!
//! - `memory` - Process-local store
//! - `file` - JSON file in the user's config directory

mod file;
mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;

/// Credentials issued by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of the access token, Unix epoch milliseconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True once `expires_at` has passed. Tokens without an expiry never expire.
    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Utc::now().timestamp_millis())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current access token, `None` when absent or expired.
    async fn access_token(&self) -> Result<Option<String>>;

    async fn refresh_token(&self) -> Result<Option<String>>;

    /// Token echoed in `X-CSRF-Token` on state-changing requests.
    async fn csrf_token(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Replaces the stored credentials with a freshly issued pair.
    async fn store_tokens(&self, tokens: TokenPair) -> Result<()>;

    async fn clear_tokens(&self) -> Result<()>;
}
