//! Process-local token store.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};

use super::{TokenPair, TokenStore};

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<TokenPair>>,
    csrf_token: Option<String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
            csrf_token: None,
        }
    }

    pub fn with_csrf_token(mut self, csrf_token: impl Into<String>) -> Self {
        self.csrf_token = Some(csrf_token.into());
        self
    }

    /// Snapshot of the stored pair, expired or not.
    pub fn tokens(&self) -> Option<TokenPair> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn access_token(&self) -> Result<Option<String>> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tokens
            .as_ref()
            .filter(|pair| !pair.is_expired())
            .map(|pair| pair.access_token.clone()))
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tokens.as_ref().map(|pair| pair.refresh_token.clone()))
    }

    async fn csrf_token(&self) -> Result<Option<String>> {
        Ok(self.csrf_token.clone())
    }

    async fn store_tokens(&self, tokens: TokenPair) -> Result<()> {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Some(tokens);
        Ok(())
    }

    async fn clear_tokens(&self) -> Result<()> {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
