use anyhow::{Context, Result, anyhow};
use clap::Parser;
use portal_client::{ApiClient, ClientConfig, FileTokenStore, RequestOptions, TokenPair, TokenStore};
use reqwest::Method;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// portal-client - command line access to the platform API
///
/// Calls go through the same client the portal uses: bearer authentication,
/// retries with exponential backoff on server errors and a transparent token
/// refresh when the access token has expired.
///
/// Examples:
///   portal-client login --access-token A --refresh-token R
///   portal-client --base-url https://api.example.net request /subscribers -p status=active
#[derive(Parser, Debug)]
#[command(author, version = env!("PORTAL_CLIENT_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL
    #[arg(long, env = "PORTAL_BASE_URL", value_name = "URL", global = true)]
    base_url: Option<String>,

    /// API key sent with every request
    #[arg(long, env = "PORTAL_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Tenant the requests act on
    #[arg(long, env = "PORTAL_TENANT_ID", value_name = "ID", global = true)]
    tenant: Option<String>,

    /// Portal the requests are issued from (admin, reseller, customer...)
    #[arg(long, env = "PORTAL_PORTAL", global = true)]
    portal: Option<String>,

    /// Per-attempt timeout in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    timeout_ms: Option<u64>,

    /// Retries after the first attempt for server errors
    #[arg(long, value_name = "N", global = true)]
    retries: Option<u32>,

    /// Token file (defaults to <config dir>/portal-client/tokens.json)
    #[arg(long, env = "PORTAL_TOKEN_FILE", value_name = "PATH", global = true)]
    token_file: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Call an endpoint and print the JSON response
    Request(RequestArgs),

    /// Store an access/refresh token pair
    Login(LoginArgs),

    /// Forget the stored tokens
    Logout,
}

#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// Endpoint path, e.g. /subscribers/42
    #[arg(value_name = "ENDPOINT")]
    pub endpoint: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Query parameter, repeatable
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// JSON request body
    #[arg(short = 'd', long, value_name = "JSON")]
    pub data: Option<String>,

    /// Always hit the network, even for cached GETs
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(clap::Args, Debug)]
pub struct LoginArgs {
    #[arg(long)]
    pub access_token: String,

    #[arg(long)]
    pub refresh_token: String,

    /// Access token expiry, epoch milliseconds
    #[arg(long, value_name = "MS")]
    pub expires_at: Option<i64>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

impl Cli {
    fn token_store(&self) -> Result<FileTokenStore> {
        let path = match &self.token_file {
            Some(path) => path.clone(),
            None => FileTokenStore::default_path()
                .context("Could not determine the config directory; pass --token-file")?,
        };
        Ok(FileTokenStore::new(path))
    }

    fn client_config(&self) -> Result<ClientConfig> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("No API base URL; pass --base-url or set PORTAL_BASE_URL"))?;

        let mut config = ClientConfig::new(base_url);
        if let Some(api_key) = &self.api_key {
            config = config.with_api_key(api_key);
        }
        if let Some(tenant) = &self.tenant {
            config = config.with_tenant(tenant);
        }
        if let Some(portal) = &self.portal {
            config = config.with_portal(portal);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(retries) = self.retries {
            config = config.with_retries(retries);
        }
        Ok(config)
    }
}

fn request_options(args: &RequestArgs) -> Result<RequestOptions> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", args.method))?;

    let mut options = RequestOptions::new(method);
    for (key, value) in &args.params {
        options = options.param(key, value);
    }
    if let Some(data) = &args.data {
        let body: Value = serde_json::from_str(data).context("Request body is not valid JSON")?;
        options = options.json(body);
    }
    if args.no_cache {
        options = options.cache(false);
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let tokens = cli.token_store()?;

    match &cli.command {
        Commands::Request(args) => {
            let client = ApiClient::new(cli.client_config()?, Arc::new(tokens))?;
            let options = request_options(args)?;
            let response: Value = client.request(&args.endpoint, options).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Login(args) => {
            let mut pair = TokenPair::new(&args.access_token, &args.refresh_token);
            if let Some(expires_at) = args.expires_at {
                pair = pair.with_expires_at(expires_at);
            }
            tokens.store_tokens(pair).await?;
            println!("Tokens saved to {}", tokens.path().display());
        }
        Commands::Logout => {
            tokens.clear_tokens().await?;
            println!("Signed out");
        }
    }
    Ok(())
}
