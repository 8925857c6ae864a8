//! HTTP clients for the backend REST API.
//!
//! Both clients share one `ApiClient`, which owns the `reqwest::Client`, joins
//! paths onto the configured base URL and maps transport/status failures into
//! `ApiError`.

pub mod accounts;
pub mod visa;

pub use accounts::{Account, AccountDraft, AccountsApi, HttpAccountsApi};
pub use visa::{
    ApplicationData, HttpVisaApi, SubmitRequest, SubmitResponse, TokenResponse, VerifyResponse,
    VisaApi,
};

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::ConsoleConfig;
use crate::error::{ApiError, ConfigError};

/// Shared HTTP transport bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

/// Failure body shape the backend uses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<serde_json::Value>,
}

impl ApiClient {
    pub fn new(config: &ConsoleConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            timeout: config.http_timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request, returning the response only if its status is a success.
    pub(crate) async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout: self.timeout,
                }
            } else {
                ApiError::Network {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = failure_message(&body, status);
        tracing::warn!(endpoint, status = status.as_u16(), "Backend rejected request");
        Err(ApiError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    /// Send a request and decode a JSON success body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.send(endpoint, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Pull the `message` field out of a failure body, falling back to the raw
/// text or the status reason.
fn failure_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        match parsed.message {
            Some(serde_json::Value::String(s)) => return s,
            Some(other) if !other.is_null() => return other.to_string(),
            _ => {}
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn failure_message_prefers_json_message() {
        let msg = failure_message(r#"{"message":"Invalid token"}"#, StatusCode::UNAUTHORIZED);
        assert_eq!(msg, "Invalid token");
    }

    #[test]
    fn failure_message_falls_back_to_body_then_reason() {
        assert_eq!(
            failure_message("upstream down", StatusCode::BAD_GATEWAY),
            "upstream down"
        );
        assert_eq!(failure_message("", StatusCode::NOT_FOUND), "Not Found");
        assert_eq!(
            failure_message(r#"{"message":null}"#, StatusCode::NOT_FOUND),
            r#"{"message":null}"#
        );
    }

    #[test]
    fn url_joins_onto_base() {
        let client = ApiClient::new(&ConsoleConfig::new("http://backend.test/")).unwrap();
        assert_eq!(client.base_url(), "http://backend.test");
        assert_eq!(client.url("/captcha"), "http://backend.test/captcha");
    }
}
