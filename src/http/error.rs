//! Error types produced by the API client.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Normalized description of a failed HTTP response.
///
/// Built once per failed response, handed to
/// [`LifecycleHooks::on_error`](crate::hooks::LifecycleHooks::on_error) and then
/// carried inside [`RequestError::Http`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

impl ApiError {
    /// Builds an error from a response status and its leniently parsed body.
    ///
    /// Backends report errors either flat (`{"code", "message"}`) or nested
    /// (`{"error": {"code", "message"}}`); both shapes are recognized. Missing
    /// fields fall back to `HTTP_<status>` and the canonical reason phrase.
    pub fn from_response(status: StatusCode, data: &Value, path: &str) -> Self {
        let nested = data.get("error");
        let field = |name: &str| {
            data.get(name)
                .or_else(|| nested.and_then(|e| e.get(name)))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let code = field("code").unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));
        let message = field("message")
            .or_else(|| nested.and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| match status.canonical_reason() {
                Some(reason) => reason.to_string(),
                None => format!("HTTP {} error", status.as_u16()),
            });
        let details = data
            .get("details")
            .cloned()
            .or_else(|| (!is_empty_object(data)).then(|| data.clone()));

        Self {
            code,
            message,
            details,
            status_code: status.as_u16(),
            timestamp: Utc::now(),
            path: path.to_string(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, HTTP {}) at {}",
            self.message, self.code, self.status_code, self.path
        )
    }
}

fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

/// Every way a call through [`ApiClient`](super::ApiClient) can fail.
#[derive(Debug)]
pub enum RequestError {
    /// The attempt did not finish within the configured timeout.
    Timeout { path: String, timeout: Duration },
    /// The request never produced a response (connect, DNS, reset).
    Network {
        path: String,
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    Http {
        status: StatusCode,
        code: String,
        data: Value,
        headers: HeaderMap,
        api_error: ApiError,
    },
    /// A response arrived but its body could not be read.
    Body {
        path: String,
        source: reqwest::Error,
    },
    /// No usable credentials; the user has to sign in again.
    AuthenticationRequired { reason: String },
    /// The token refresh worked but replaying the request did not.
    RetryAfterRefreshFailed { source: Box<RequestError> },
    /// The request could not be built (bad header value, bad URL).
    InvalidRequest(String),
}

impl RequestError {
    /// HTTP status of the failure, when the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            RequestError::RetryAfterRefreshFailed { source } => source.status(),
            _ => None,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            RequestError::Timeout { .. } => "TIMEOUT",
            RequestError::Network { .. } => "NETWORK_ERROR",
            RequestError::Http { code, .. } => code,
            RequestError::Body { .. } => "BODY_ERROR",
            RequestError::AuthenticationRequired { .. } => "AUTH_REQUIRED",
            RequestError::RetryAfterRefreshFailed { .. } => "RETRY_AFTER_REFRESH_FAILED",
            RequestError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// Parsed response body of an HTTP failure.
    pub fn data(&self) -> Option<&Value> {
        match self {
            RequestError::Http { data, .. } => Some(data),
            RequestError::RetryAfterRefreshFailed { source } => source.data(),
            _ => None,
        }
    }

    /// Response headers of an HTTP failure.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            RequestError::Http { headers, .. } => Some(headers),
            RequestError::RetryAfterRefreshFailed { source } => source.headers(),
            _ => None,
        }
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            RequestError::Http { api_error, .. } => Some(api_error),
            RequestError::RetryAfterRefreshFailed { source } => source.api_error(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout { .. })
    }

    pub fn is_authentication_required(&self) -> bool {
        matches!(self, RequestError::AuthenticationRequired { .. })
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Timeout { path, timeout } => {
                write!(f, "Request timeout after {}ms: {}", timeout.as_millis(), path)
            }
            RequestError::Network { path, source } => {
                write!(f, "Network request failed: {}: {}", path, source)
            }
            RequestError::Http { api_error, .. } => {
                write!(f, "{}", api_error)
            }
            RequestError::Body { path, source } => {
                write!(f, "Failed to read response body from {}: {}", path, source)
            }
            RequestError::AuthenticationRequired { reason } => {
                write!(f, "Authentication required: {}. Sign in again.", reason)
            }
            RequestError::RetryAfterRefreshFailed { source } => {
                write!(f, "Retry after token refresh failed: {}", source)
            }
            RequestError::InvalidRequest(msg) => {
                write!(f, "Invalid request: {}", msg)
            }
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RequestError::Network { source, .. } | RequestError::Body { source, .. } => {
                Some(source)
            }
            RequestError::RetryAfterRefreshFailed { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_flat_body() {
        let data = json!({"code": "PLAN_NOT_FOUND", "message": "No such plan"});
        let err = ApiError::from_response(StatusCode::NOT_FOUND, &data, "/plans/9");

        assert_eq!(err.code, "PLAN_NOT_FOUND");
        assert_eq!(err.message, "No such plan");
        assert_eq!(err.status_code, 404);
        assert_eq!(err.path, "/plans/9");
        assert_eq!(err.details, Some(data));
    }

    #[test]
    fn test_api_error_nested_body() {
        let data = json!({"error": {"code": "INVALID_MAC", "message": "MAC address malformed"}, "details": {"field": "mac"}});
        let err = ApiError::from_response(StatusCode::UNPROCESSABLE_ENTITY, &data, "/cpe");

        assert_eq!(err.code, "INVALID_MAC");
        assert_eq!(err.message, "MAC address malformed");
        assert_eq!(err.details, Some(json!({"field": "mac"})));
    }

    #[test]
    fn test_api_error_string_error_field() {
        let data = json!({"error": "quota exceeded"});
        let err = ApiError::from_response(StatusCode::BAD_REQUEST, &data, "/x");
        assert_eq!(err.message, "quota exceeded");
        assert_eq!(err.code, "HTTP_400");
    }

    #[test]
    fn test_api_error_empty_body_falls_back_to_status() {
        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, &json!({}), "/x");
        assert_eq!(err.code, "HTTP_502");
        assert_eq!(err.message, "Bad Gateway");
        assert!(err.details.is_none());
    }

    #[test]
    fn test_api_error_serializes_camel_case() {
        let err = ApiError::from_response(StatusCode::FORBIDDEN, &json!({}), "/x");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["statusCode"], 403);
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_request_error_display() {
        let err = RequestError::Timeout {
            path: "/slow".to_string(),
            timeout: Duration::from_millis(100),
        };
        assert!(err.to_string().contains("Request timeout"));
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.is_timeout());

        let err = RequestError::AuthenticationRequired {
            reason: "no refresh token available".to_string(),
        };
        assert!(err.to_string().contains("Authentication required"));
        assert!(err.is_authentication_required());
        assert!(err.status().is_none());
    }

    #[test]
    fn test_retry_after_refresh_failed_exposes_inner_http_data() {
        let data = json!({"message": "nope"});
        let api_error = ApiError::from_response(StatusCode::FORBIDDEN, &data, "/x");
        let inner = RequestError::Http {
            status: StatusCode::FORBIDDEN,
            code: api_error.code.clone(),
            data: data.clone(),
            headers: HeaderMap::new(),
            api_error,
        };
        let err = RequestError::RetryAfterRefreshFailed {
            source: Box::new(inner),
        };

        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(err.data(), Some(&data));
        assert_eq!(err.code(), "RETRY_AFTER_REFRESH_FAILED");
        assert!(err.to_string().contains("Retry after token refresh failed"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
