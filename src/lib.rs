pub mod cache;
pub mod config;
pub mod hooks;
pub mod http;
pub mod rate_limit;
pub mod token;

pub use config::{AuthConfig, ClientConfig};
pub use http::{ApiClient, ApiError, RequestError, RequestOptions};
pub use token::{FileTokenStore, MemoryTokenStore, TokenPair, TokenStore};

#[cfg(test)]
pub mod test_utils;
