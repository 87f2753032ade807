//! Chat completions client with retry and backoff

use std::time::Duration;

use forge_core::{CapabilityError, UplinkSettings};

use crate::error::UplinkError;
use crate::wire::{ChatRequest, ChatResponse, Message};

/// Longest response body excerpt kept in a status error
const BODY_EXCERPT: usize = 500;

/// How transient failures are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based)
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Client for one OpenAI-compatible endpoint
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Build a client from settings
    ///
    /// # Errors
    /// Returns [`UplinkError`] for a non-http endpoint, an empty model, or
    /// when the HTTP client cannot be initialized.
    pub fn new(settings: &UplinkSettings, api_key: Option<String>) -> Result<Self, UplinkError> {
        let endpoint = settings.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(UplinkError::InvalidEndpoint(settings.endpoint.clone()));
        }
        if settings.model.trim().is_empty() {
            return Err(UplinkError::MissingModel);
        }
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .user_agent(concat!("forge/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            model: settings.model.clone(),
            api_key,
            temperature: settings.temperature,
            timeout,
            retry: RetryPolicy::default(),
        })
    }

    /// With a retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the reply text.
    ///
    /// With `json` set the endpoint is asked for a JSON object reply.
    ///
    /// # Errors
    /// Returns the last [`CapabilityError`] once retries are used up, or
    /// the first non-retryable one.
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        json: bool,
    ) -> Result<String, CapabilityError> {
        let mut request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            response_format: None,
        };
        if json {
            request = request.json_reply();
        }

        let mut retry = 0;
        loop {
            match self.send(&request).await {
                Ok(text) => {
                    metrics::counter!("forge_uplink_requests_total", "outcome" => "ok").increment(1);
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay(retry);
                    retry += 1;
                    metrics::counter!("forge_uplink_requests_total", "outcome" => "retry")
                        .increment(1);
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        retry,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "uplink unavailable, backing off: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    metrics::counter!("forge_uplink_requests_total", "outcome" => "error")
                        .increment(1);
                    tracing::error!(endpoint = %self.endpoint, "uplink request failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, CapabilityError> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| self.transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body: body.chars().take(BODY_EXCERPT).collect(),
            });
        }
        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CapabilityError::Timeout(self.timeout)
            } else {
                CapabilityError::Decode(e.to_string())
            }
        })?;
        parsed.into_text().ok_or(CapabilityError::Empty)
    }

    fn transport(&self, error: &reqwest::Error) -> CapabilityError {
        if error.is_timeout() {
            CapabilityError::Timeout(self.timeout)
        } else {
            CapabilityError::Transport(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
        assert_eq!(RetryPolicy::none().delay(5), Duration::ZERO);
    }

    #[test]
    fn settings_are_checked() {
        let mut settings = UplinkSettings::default();
        assert!(ChatClient::new(&settings, None).is_ok());

        settings.endpoint = "ftp://example.com".into();
        assert!(matches!(
            ChatClient::new(&settings, None),
            Err(UplinkError::InvalidEndpoint(_))
        ));

        settings = UplinkSettings {
            model: " ".into(),
            ..UplinkSettings::default()
        };
        assert!(matches!(
            ChatClient::new(&settings, None),
            Err(UplinkError::MissingModel)
        ));
    }

    #[test]
    fn debug_hides_key() {
        let client = ChatClient::new(&UplinkSettings::default(), Some("sk-secret".into())).unwrap();
        let shown = format!("{client:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
    }
}
