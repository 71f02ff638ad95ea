//! HTTP client module with retry logic, token refresh and error handling.

mod client;
mod error;
mod refresh;
mod request;
mod retry;

pub use client::ApiClient;
pub use error::{ApiError, RequestError};
pub use request::{
    API_KEY_HEADER, CSRF_TOKEN_HEADER, PORTAL_HEADER, REQUESTED_WITH_HEADER, RequestBody,
    RequestOptions, TENANT_HEADER, bearer_value, build_headers, build_url, requires_csrf,
};
pub use retry::{BASE_DELAY_MS, BackoffPolicy, DEFAULT_MAX_DELAY, DEFAULT_RETRIES, should_retry};
