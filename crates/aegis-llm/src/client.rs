//! Completion client.
//!
//! The gateway consumes a single capability from the outside world: turn a
//! rendered prompt into text.  [`CompletionClient`] is that seam; the
//! shipped implementation speaks an OpenAI-style completions API over
//! HTTPS.  Tests substitute scripted implementations.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{LlmError, Result};

/// Parameters for a single completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The fully rendered prompt text.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

/// The single outbound capability: `prompt -> text`.
///
/// Implementations classify their failures into the four [`LlmError`]
/// outcomes; transport detail never leaks past this trait.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Configuration for the HTTP completion client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Base URL of the completion endpoint.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
}

/// Completion client speaking an OpenAI-style `/v1/completions` API.
pub struct HttpCompletionClient {
    config: HttpClientConfig,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    /// Create a new client.  Fails if the API key is empty.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(LlmError::Unavailable {
                reason: "empty API key".into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Unavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, http })
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.config.model,
            "prompt": request.prompt,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }

    /// Pull the completion text out of the response JSON.
    fn parse_response(v: &Value) -> Result<String> {
        let text = v["choices"][0]["text"]
            .as_str()
            .or_else(|| v["choices"][0]["message"]["content"].as_str())
            .ok_or_else(|| LlmError::Unavailable {
                reason: "response missing completion text".into(),
            })?;
        Ok(text.to_owned())
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/v1/completions", self.config.base_url);
        let body = self.build_body(request);

        tracing::debug!(
            url = %url,
            model = %self.config.model,
            temperature = request.temperature,
            "sending completion request"
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        deadline_ms: 120_000,
                    }
                } else {
                    LlmError::Unavailable {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| LlmError::Unavailable {
            reason: format!("failed to read response body: {e}"),
        })?;

        if status.as_u16() == 429 {
            return Err(LlmError::QuotaExceeded);
        }
        if status.is_client_error() {
            return Err(LlmError::RemoteRejected {
                status: status.as_u16(),
                reason: text,
            });
        }
        if !status.is_success() {
            return Err(LlmError::Unavailable {
                reason: format!("endpoint returned {status}: {text}"),
            });
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| LlmError::Unavailable {
            reason: format!("invalid JSON response: {e}"),
        })?;

        Self::parse_response(&v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        let result = HttpCompletionClient::new(HttpClientConfig {
            api_key: String::new(),
            base_url: "https://llm.example.com".into(),
            model: "test-model".into(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn build_body_includes_model_and_prompt() {
        let client = HttpCompletionClient::new(HttpClientConfig {
            api_key: "key".into(),
            base_url: "https://llm.example.com".into(),
            model: "test-model".into(),
        })
        .unwrap();

        let body = client.build_body(&CompletionRequest {
            prompt: "classify this".into(),
            temperature: 0.0,
            max_tokens: 256,
        });

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["prompt"], "classify this");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn parse_completions_shape() {
        let v = serde_json::json!({"choices": [{"text": "tool_request"}]});
        assert_eq!(
            HttpCompletionClient::parse_response(&v).unwrap(),
            "tool_request"
        );
    }

    #[test]
    fn parse_chat_shape() {
        let v = serde_json::json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(HttpCompletionClient::parse_response(&v).unwrap(), "hello");
    }

    #[test]
    fn parse_missing_text_fails() {
        let v = serde_json::json!({"choices": []});
        assert!(HttpCompletionClient::parse_response(&v).is_err());
    }
}
