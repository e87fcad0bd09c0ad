use std::sync::Arc;

use parley_common::Result;
use parley_config::ProvidersConfig;
use tracing::info;

use super::{GigaChatProvider, LlmProvider, OllamaProvider, OpenRouterProvider};

/// Build a client for every backend that has a config section.
/// A cloud section without its credential is a configuration error.
pub fn build_providers(config: &ProvidersConfig) -> Result<Vec<Arc<dyn LlmProvider>>> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

    if let Some(cfg) = &config.gigachat {
        providers.push(Arc::new(GigaChatProvider::from_config(cfg)?));
    }
    if let Some(cfg) = &config.openrouter {
        providers.push(Arc::new(OpenRouterProvider::from_config(cfg)?));
    }
    if let Some(cfg) = &config.ollama {
        providers.push(Arc::new(OllamaProvider::from_config(cfg)));
    }

    for provider in &providers {
        info!(
            provider = provider.provider_id(),
            model = provider.default_model(),
            "registered provider"
        );
    }
    Ok(providers)
}
