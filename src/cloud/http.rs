//! HTTP utilities for control-plane REST calls

use crate::error::{RemoteErrorKind, RemoteServiceError};
use anyhow::{Context, Result};
use reqwest::{Client, Method};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Header carrying the IAM token
const AUTH_HEADER: &str = "X-Auth-Token";

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Labels attached to every request for error reporting
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    pub service: &'a str,
    pub operation: &'a str,
}

impl CallSite<'_> {
    fn error(&self, kind: RemoteErrorKind, message: impl Into<String>) -> RemoteServiceError {
        RemoteServiceError::new(self.service, self.operation, kind, message)
    }
}

/// HTTP client wrapper for control-plane API calls
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cloudmend/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Send a request and decode the JSON response. Empty bodies decode to `null`.
    pub async fn send(
        &self,
        site: CallSite<'_>,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, RemoteServiceError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);
        if !token.is_empty() {
            request = request.header(AUTH_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| site.error(RemoteErrorKind::Transport, format!("Failed to send request: {}", e)))?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| {
            site.error(
                RemoteErrorKind::Transport,
                format!("Failed to read response body: {}", e),
            )
        })?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(site.error(
                RemoteErrorKind::Http(status.as_u16()),
                format!("API request failed: {}", status),
            ));
        }

        if response_body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body).map_err(|e| {
            site.error(
                RemoteErrorKind::Decode,
                format!("Failed to parse response JSON: {}", e),
            )
        })
    }
}

/// Format a remote error for display
/// Avoids echoing raw API messages back to the user
pub fn format_api_error(error: &RemoteServiceError) -> String {
    match error.kind {
        RemoteErrorKind::Http(403) => "Permission denied. Check your IAM permissions.".to_string(),
        RemoteErrorKind::Http(401) => {
            "Authentication failed. Refresh the token in HUAWEI_AUTH_TOKEN.".to_string()
        }
        RemoteErrorKind::Http(404) => "Resource not found.".to_string(),
        RemoteErrorKind::Http(409) => {
            "Resource conflict. The resource may already exist or be in use.".to_string()
        }
        RemoteErrorKind::Http(429) => "Rate limit exceeded. Please try again later.".to_string(),
        RemoteErrorKind::Http(400) => "Invalid request. Check your parameters.".to_string(),
        RemoteErrorKind::Http(status) if status >= 500 => {
            "Service temporarily unavailable. Please try again.".to_string()
        }
        RemoteErrorKind::Http(status) => format!("Request failed with status {}.", status),
        RemoteErrorKind::Transport => {
            "Request failed. Check your network connection and try again.".to_string()
        }
        RemoteErrorKind::Decode => "Unexpected response from the service.".to_string(),
        RemoteErrorKind::Unsupported => error.message.clone(),
    }
}
