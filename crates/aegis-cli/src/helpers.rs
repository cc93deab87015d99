//! Shared startup helpers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use aegis_brain::{AegisConfig, Brain, BrainConfig};
use aegis_exec::Executor;
use aegis_llm::{HttpClientConfig, HttpCompletionClient};
use aegis_registry::RegistryStore;
use aegis_store::SessionStore;

/// Initialize the tracing subscriber.  `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Load the registries; fatal if the risk-pattern database is unusable.
pub fn load_registry(config: &AegisConfig) -> Result<Arc<RegistryStore>> {
    let registry = RegistryStore::load(config.registry_paths())
        .context("failed to load registries (the risk-pattern database is required)")?;
    Ok(Arc::new(registry))
}

/// Assemble the full pipeline from configuration.
pub async fn build_brain(config: &AegisConfig) -> Result<Brain> {
    let api_key = AegisConfig::api_key().context("the LLM API key is required at startup")?;

    let registry = load_registry(config)?;
    tracing::info!(
        tools = registry.selectable_names().len(),
        patterns = registry.patterns().len(),
        "registries loaded"
    );

    let client = Arc::new(
        HttpCompletionClient::new(HttpClientConfig {
            api_key,
            base_url: config.llm.base_url.clone(),
            model: config.llm.model.clone(),
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    let store = Arc::new(
        SessionStore::open(config.paths.sessions.clone(), config.store_config())
            .await
            .context("failed to open the session store")?,
    );

    let executor = Executor::new(config.executor_config());

    Ok(Brain::new(
        registry,
        client,
        config.gateway_config(),
        store,
        executor,
        BrainConfig {
            confirm_at: config.risk.require_confirmation_at,
            default_deadline: std::time::Duration::from_secs(config.executor.default_deadline_s),
            caps: config.resource_caps(),
        },
    ))
}
