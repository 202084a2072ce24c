//! Provider router: builds generation backends from config and resolves
//! which provider and model a request should go to.

use std::collections::HashMap;
use std::sync::Arc;
use ragloom_core::provider::Provider;
use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Routes generation requests to the correct provider.
#[derive(Clone)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
    default_model: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider and model.
    pub fn new(default_provider: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
            default_model: default_model.into(),
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

    pub fn default_provider_name(&self) -> &str {
        &self.default_provider
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve a model spec to a provider and bare model name.
    ///
    /// Accepts `"provider:model"` for a registered provider, a bare model name
    /// (default provider), or `None` (default provider and model).
    pub fn resolve(&self, model_spec: Option<&str>) -> Option<(Arc<dyn Provider>, String)> {
        let Some(spec) = model_spec.map(str::trim).filter(|s| !s.is_empty()) else {
            return self.default().map(|p| (p, self.default_model.clone()));
        };

        if let Some((prefix, model)) = spec.split_once(':')
            && let Some(provider) = self.get(prefix)
        {
            return Some((provider, model.to_string()));
        }

        self.default().map(|p| (p, spec.to_string()))
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &ragloom_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider, &config.default_model);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        router.register(
            name.clone(),
            make_provider(name, provider_config.api_url.as_deref(), &api_key),
        );
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        router.register(
            config.default_provider.clone(),
            make_provider(&config.default_provider, None, &api_key),
        );
    }

    router
}

fn make_provider(name: &str, api_url: Option<&str>, api_key: &str) -> Arc<dyn Provider> {
    if name == "anthropic" {
        let mut p = AnthropicProvider::new(api_key);
        if let Some(url) = api_url {
            p = p.with_base_url(url);
        }
        return Arc::new(p);
    }

    let base_url = api_url
        .map(String::from)
        .unwrap_or_else(|| default_base_url(name));
    Arc::new(OpenAiCompatProvider::new(name, base_url, api_key))
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => "https://api.anthropic.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ProviderRouter {
        let mut router = ProviderRouter::new("openai", "gpt-4o-mini");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));
        router.register("anthropic", Arc::new(AnthropicProvider::new("sk-ant")));
        router
    }

    #[test]
    fn router_register_and_lookup() {
        let router = router();
        assert!(router.get("openai").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
        assert_eq!(router.list(), vec!["anthropic", "openai"]);
    }

    #[test]
    fn resolve_defaults_when_unspecified() {
        let (provider, model) = router().resolve(None).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(model, "gpt-4o-mini");
    }

    #[test]
    fn resolve_prefixed_model() {
        let (provider, model) = router().resolve(Some("anthropic:claude-sonnet-4-20250514")).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn resolve_unknown_prefix_keeps_full_model_on_default() {
        let (provider, model) = router().resolve(Some("llama3:8b")).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(model, "llama3:8b");
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = ragloom_config::AppConfig::default();
        let router = build_from_config(&config);
        assert_eq!(router.default().unwrap().name(), "openai");
        assert_eq!(router.default_model(), "gpt-4o-mini");
    }

    #[test]
    fn build_registers_configured_anthropic() {
        let mut config = ragloom_config::AppConfig::default();
        config.providers.insert(
            "anthropic".into(),
            ragloom_config::ProviderConfig {
                api_key: Some("sk-ant".into()),
                ..Default::default()
            },
        );
        let router = build_from_config(&config);
        assert_eq!(router.get("anthropic").unwrap().name(), "anthropic");
        assert!(router.get("openai").is_some());
    }
}
