//! Shared HTTP plumbing for the OpenAI-compatible service clients.

use crate::config::Endpoint;
use crate::error::{Result, TalkbackError};
use std::time::Duration;
use tracing::warn;

/// Which service a client talks to; selects the error variant for failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Transcription,
    Generation,
    Synthesis,
}

impl Service {
    /// Wraps a message in this service's error variant.
    pub fn error(self, message: impl Into<String>) -> TalkbackError {
        let message = message.into();
        match self {
            Service::Transcription => TalkbackError::Transcription { message },
            Service::Generation => TalkbackError::Generation { message },
            Service::Synthesis => TalkbackError::Synthesis { message },
        }
    }
}

/// Authenticated client for one service endpoint.
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    service: Service,
}

impl ServiceClient {
    /// Builds a client for `endpoint`.
    ///
    /// # Errors
    /// Fails if the base URL does not parse, if the hosted OpenAI API is
    /// targeted without an API key, or if the HTTP client cannot be built.
    pub fn new(endpoint: &Endpoint, service: Service) -> Result<Self> {
        let base_url = endpoint.base_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| service.error(format!("Invalid base URL '{}': {}", base_url, e)))?;

        let api_key = resolve_api_key(&endpoint.api_key_env);
        if api_key.is_none() {
            if base_url.contains("api.openai.com") {
                return Err(TalkbackError::ApiKeyMissing {
                    env_var: endpoint.api_key_env.clone(),
                });
            }
            warn!(
                base_url = %base_url,
                env_var = %endpoint.api_key_env,
                "no API key set, sending unauthenticated requests"
            );
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| service.error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            service,
        })
    }

    /// Full URL for an API path such as `chat/completions`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST request with authentication applied.
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.post(self.url(path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Sends `request`, mapping transport errors and non-2xx statuses to this
    /// service's error variant.
    pub async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                self.service.error(format!("Request timed out: {}", e))
            } else {
                self.service.error(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(self.service.error(format!(
            "HTTP {}: {}",
            status.as_u16(),
            api_error_message(&body)
        )))
    }

    pub fn service(&self) -> Service {
        self.service
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .field("service", &self.service)
            .finish()
    }
}

/// Reads the API key from `env_var`. Empty names and values count as unset.
fn resolve_api_key(env_var: &str) -> Option<String> {
    if env_var.is_empty() {
        return None;
    }
    std::env::var(env_var).ok().filter(|key| !key.trim().is_empty())
}

/// Extracts `error.message` from an OpenAI-style error body, falling back to
/// the raw (truncated) body.
pub fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response body".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        })
}
