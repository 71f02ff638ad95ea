//! Token store backed by a JSON file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use super::{TokenPair, TokenStore};

const TOKEN_FILE_NAME: &str = "tokens.json";

/// Persists the token pair between CLI invocations.
///
/// Writes go to a temporary file that is renamed over the old one, so a
/// crash mid-write never leaves a truncated token file behind.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/portal-client/tokens.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("portal-client").join(TOKEN_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored pair; a missing file means no tokens.
    pub fn load(&self) -> Result<Option<TokenPair>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file {}", self.path.display()))?;
        let tokens = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token file {}", self.path.display()))?;
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(tokens).context("Failed to serialize tokens")?;
        fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write token file {}", tmp.display()))?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace token file {}", self.path.display()))?;

        debug!("Saved tokens to {}", self.path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .load()?
            .filter(|pair| !pair.is_expired())
            .map(|pair| pair.access_token))
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.load()?.map(|pair| pair.refresh_token))
    }

    async fn store_tokens(&self, tokens: TokenPair) -> Result<()> {
        self.save(&tokens)
    }

    async fn clear_tokens(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove token file {}", self.path.display()))?;
            debug!("Removed token file {}", self.path.display());
        }
        Ok(())
    }
}
