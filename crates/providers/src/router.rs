//! Provider router: selects the correct LLM provider based on config.
//!
//! Builds one provider per configured backend and resolves the primary and
//! fallback models to [`ModelRoute`]s.

use std::collections::HashMap;
use std::sync::Arc;

use voxline_config::AppConfig;
use voxline_core::error::ProviderError;
use voxline_core::provider::{ModelRoute, Provider};

use crate::openai_compat::OpenAiCompatProvider;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Bind `model` to the provider registered as `provider`.
    pub fn route(&self, provider: &str, model: &str) -> Result<ModelRoute, ProviderError> {
        self.get(provider)
            .map(|p| ModelRoute::new(p, model))
            .ok_or_else(|| ProviderError::NotConfigured(format!("no provider named '{provider}'")))
    }

    /// The route for `llm.model`.
    pub fn primary_route(&self, config: &AppConfig) -> Result<ModelRoute, ProviderError> {
        self.route(&config.llm.provider, &config.llm.model)
    }

    /// The route for `fallback.model`, if one is configured.
    pub fn fallback_route(&self, config: &AppConfig) -> Result<Option<ModelRoute>, ProviderError> {
        config
            .fallback
            .model
            .as_deref()
            .map(|model| self.route(config.fallback_provider(), model))
            .transpose()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Every `[providers.<name>]` entry is registered, plus the providers named by
/// `llm.provider` and `fallback.provider` even when they have no section.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.llm.provider);

    let mut names: Vec<&str> = config.providers.keys().map(String::as_str).collect();
    names.push(&config.llm.provider);
    names.push(config.fallback_provider());
    names.sort_unstable();
    names.dedup();

    for name in names {
        let section = config.providers.get(name);

        let api_key = section
            .and_then(|p| p.api_key.clone())
            .or_else(|| std::env::var(api_key_env(name)).ok())
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let base_url = section
            .and_then(|p| p.api_url.clone())
            .or_else(|| (name == config.llm.provider).then(|| config.api_url.clone()).flatten())
            .or_else(|| default_base_url(name).map(String::from))
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "provider '{name}' has no known endpoint; set providers.{name}.api_url"
                ))
            })?;

        let provider = OpenAiCompatProvider::new(name, base_url, api_key)?;
        router.register(name, Arc::new(provider));
    }

    Ok(router)
}

/// `fireworks` -> `FIREWORKS_API_KEY`
fn api_key_env(provider_name: &str) -> String {
    let stem: String = provider_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{stem}_API_KEY")
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "openai" => Some("https://api.openai.com/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        _ => None,
    }
}
