//! The LLM gateway.
//!
//! Renders a named template with supplied bindings and calls the
//! completion endpoint, returning text.  The gateway does no interpretation
//! of the text; callers parse.  Transient failures are retried with
//! exponential backoff; identical deterministic renderings (temperature 0)
//! are served from a bounded LRU cache without touching the endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use aegis_registry::RegistryStore;

use crate::client::{CompletionClient, CompletionRequest};
use crate::error::LlmError;

/// Retry/backoff constants.
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_JITTER_MS: u64 = 250;

/// Gateway-level failures: either one of the four completion outcomes, or
/// a template that does not exist in the registry.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("template missing: {name}")]
    TemplateMissing { name: String },
}

/// Tunables for the gateway, mirrored from the `[llm]` config section.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Temperature used when the caller does not supply one.
    pub temperature_default: f32,
    /// Per-call deadline covering the whole retry loop.
    pub deadline: Duration,
    /// Number of attempts for transient failures.
    pub retry_attempts: u32,
    /// Token budget sent to the endpoint.
    pub max_tokens: u32,
    /// Hard cap on returned text size.
    pub max_output_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            temperature_default: 0.1,
            deadline: Duration::from_secs(30),
            retry_attempts: 3,
            max_tokens: 1024,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Override the default temperature.
    pub temperature: Option<f32>,
    /// Override the default output byte cap.
    pub max_output_bytes: Option<usize>,
    /// Override the default deadline.
    pub deadline: Option<Duration>,
}

impl GenerateOptions {
    /// Deterministic sampling (temperature 0); cacheable.
    pub fn deterministic() -> Self {
        Self {
            temperature: Some(0.0),
            ..Self::default()
        }
    }

    /// Options with a specific temperature.
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Self::default()
        }
    }
}

/// Template rendering plus completion, with retry and caching.
///
/// Calls are independent; no per-session state is held across calls, so
/// the gateway is freely shared behind an `Arc`.
pub struct Gateway {
    client: Arc<dyn CompletionClient>,
    registry: Arc<RegistryStore>,
    cache: Cache<String, String>,
    config: GatewayConfig,
}

impl Gateway {
    /// Create a gateway over the given completion client and registry.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: Arc<RegistryStore>,
        config: GatewayConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(256)
            .time_to_live(Duration::from_secs(300))
            .build();

        Self {
            client,
            registry,
            cache,
            config,
        }
    }

    /// Render `template` with `bindings` and return the completion text.
    ///
    /// Deterministic calls (effective temperature 0) are served from the
    /// cache when an identical rendering was answered recently; cache hits
    /// bypass the retry loop entirely.
    pub async fn generate(
        &self,
        template: &str,
        bindings: &HashMap<String, String>,
        options: GenerateOptions,
    ) -> Result<String, GatewayError> {
        let prompt = self
            .registry
            .template(template)
            .map_err(|_| GatewayError::TemplateMissing {
                name: template.into(),
            })?
            .render(bindings);

        let temperature = options
            .temperature
            .unwrap_or(self.config.temperature_default);
        let deadline = options.deadline.unwrap_or(self.config.deadline);
        let cap = options
            .max_output_bytes
            .unwrap_or(self.config.max_output_bytes);

        let cache_key = (temperature == 0.0).then(|| cache_key(template, bindings));
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key).await {
                tracing::debug!(template = template, "gateway cache hit");
                return Ok(hit);
            }
        }

        let request = CompletionRequest {
            prompt,
            temperature,
            max_tokens: self.config.max_tokens,
        };

        let text = tokio::time::timeout(deadline, self.call_with_retry(&request, template))
            .await
            .map_err(|_| {
                tracing::warn!(template = template, "gateway call deadline elapsed");
                LlmError::Timeout {
                    deadline_ms: deadline.as_millis() as u64,
                }
            })??;

        let text = truncate_to_boundary(text, cap);

        if let Some(key) = cache_key {
            self.cache.insert(key, text.clone()).await;
        }

        Ok(text)
    }

    /// Call the endpoint, retrying transient failures with exponential
    /// backoff.  Rejections and quota exhaustion are never retried.
    async fn call_with_retry(
        &self,
        request: &CompletionRequest,
        template: &str,
    ) -> Result<String, LlmError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = BACKOFF_BASE_MS * (1 << (attempt - 1)) + jitter_ms();
                tracing::debug!(
                    template = template,
                    attempt = attempt + 1,
                    backoff_ms = backoff,
                    "retrying llm call"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            match self.client.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e @ LlmError::Unavailable { .. }) => {
                    tracing::warn!(template = template, error = %e, "transient llm failure");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(LlmError::Unavailable {
            reason: "retries exhausted".into(),
        }))
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

/// Cache key: template name plus bindings normalised by sorted key order.
fn cache_key(template: &str, bindings: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&str, &str)> = bindings
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort_unstable();

    let mut key = String::with_capacity(64);
    key.push_str(template);
    for (k, v) in pairs {
        key.push('\u{1f}');
        key.push_str(k);
        key.push('\u{1e}');
        key.push_str(v);
    }
    key
}

/// Truncate to at most `cap` bytes without splitting a UTF-8 sequence.
fn truncate_to_boundary(mut text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }
    let mut cut = cap;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

/// Small deterministic-enough jitter without a PRNG dependency.
fn jitter_ms() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % BACKOFF_JITTER_MS
}
