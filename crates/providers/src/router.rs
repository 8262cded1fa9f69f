//! Provider registry — named specs and client construction from config.
//!
//! Two-step pattern: specs describe where a vendor lives and which env var
//! carries its key; `create_client` resolves the configured spec into a
//! concrete client, always wrapped in the heuristic fallback. With no key
//! material at all, the bare heuristic is returned.

use picoagent_config::AppConfig;
use picoagent_core::provider::ProviderClient;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::anthropic::AnthropicClient;
use crate::fallback::FallbackClient;
use crate::heuristic::LocalHeuristicClient;
use crate::openai_compat::OpenAiCompatClient;

/// Which wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    Anthropic,
}

/// A known provider endpoint.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub name: String,
    pub base_url: String,
    pub default_chat_model: String,
    pub default_embedding_model: String,
    pub api_key_env: String,
    pub api_style: ApiStyle,
}

/// Registry of provider specs, keyed by name.
pub struct ProviderRegistry {
    specs: BTreeMap<String, ProviderSpec>,
}

impl ProviderRegistry {
    /// Registry preloaded with the built-in vendor table.
    pub fn with_default_specs() -> Self {
        let mut registry = Self { specs: BTreeMap::new() };
        for spec in default_specs() {
            registry.register(spec);
        }
        registry
    }

    pub fn register(&mut self, spec: ProviderSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ProviderSpec> {
        self.specs.get(name)
    }

    pub fn list(&self) -> Vec<&ProviderSpec> {
        self.specs.values().collect()
    }

    /// Build the client the config asks for.
    ///
    /// Key resolution: `config.api_key_env` override first, then the
    /// spec's default env var. No key (or unknown provider) degrades to
    /// the bare heuristic; a keyed client is wrapped in the fallback so a
    /// later outage degrades per call.
    pub fn create_client(&self, config: &AppConfig) -> Arc<dyn ProviderClient> {
        let Some(spec) = self.get(&config.provider) else {
            info!(provider = %config.provider, "Unknown provider, using offline heuristic");
            return Arc::new(LocalHeuristicClient::new());
        };

        let key_env = config.api_key_env.as_deref().unwrap_or(&spec.api_key_env);
        let Some(api_key) = std::env::var(key_env).ok().filter(|k| !k.is_empty()) else {
            info!(provider = %spec.name, key_env, "No API key, using offline heuristic");
            return Arc::new(LocalHeuristicClient::new());
        };

        let chat_model = config
            .chat_model
            .clone()
            .unwrap_or_else(|| spec.default_chat_model.clone());
        let embedding_model = config
            .embedding_model
            .clone()
            .unwrap_or_else(|| spec.default_embedding_model.clone());

        let primary: Arc<dyn ProviderClient> = match spec.api_style {
            ApiStyle::OpenAi => Arc::new(OpenAiCompatClient::new(
                spec.name.clone(),
                spec.base_url.clone(),
                api_key,
                chat_model,
                embedding_model,
            )),
            ApiStyle::Anthropic => {
                Arc::new(AnthropicClient::new(spec.base_url.clone(), api_key, chat_model))
            }
        };

        info!(provider = %spec.name, "Provider client ready");
        Arc::new(FallbackClient::new(primary))
    }
}

fn default_specs() -> Vec<ProviderSpec> {
    vec![
        ProviderSpec {
            name: "openrouter".into(),
            base_url: "https://openrouter.ai/api/v1".into(),
            default_chat_model: "openai/gpt-4o-mini".into(),
            default_embedding_model: "text-embedding-3-small".into(),
            api_key_env: "OPENROUTER_API_KEY".into(),
            api_style: ApiStyle::OpenAi,
        },
        ProviderSpec {
            name: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            default_chat_model: "gpt-4o-mini".into(),
            default_embedding_model: "text-embedding-3-small".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            api_style: ApiStyle::OpenAi,
        },
        ProviderSpec {
            name: "anthropic".into(),
            base_url: "https://api.anthropic.com/v1".into(),
            default_chat_model: "claude-3-5-sonnet-latest".into(),
            default_embedding_model: "text-embedding-3-small".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            api_style: ApiStyle::Anthropic,
        },
        ProviderSpec {
            name: "deepseek".into(),
            base_url: "https://api.deepseek.com/v1".into(),
            default_chat_model: "deepseek-chat".into(),
            default_embedding_model: "text-embedding-3-small".into(),
            api_key_env: "DEEPSEEK_API_KEY".into(),
            api_style: ApiStyle::OpenAi,
        },
        ProviderSpec {
            name: "groq".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            default_chat_model: "llama-3.3-70b-versatile".into(),
            default_embedding_model: "text-embedding-3-small".into(),
            api_key_env: "GROQ_API_KEY".into(),
            api_style: ApiStyle::OpenAi,
        },
        ProviderSpec {
            name: "custom".into(),
            base_url: "http://localhost:8000/v1".into(),
            default_chat_model: "local-model".into(),
            default_embedding_model: "local-embedding-model".into(),
            api_key_env: "CUSTOM_API_KEY".into(),
            api_style: ApiStyle::OpenAi,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_specs_cover_known_vendors() {
        let registry = ProviderRegistry::with_default_specs();
        for name in ["openrouter", "openai", "anthropic", "deepseek", "groq", "custom"] {
            assert!(registry.get(name).is_some(), "missing spec for {name}");
        }
        assert_eq!(registry.get("anthropic").unwrap().api_style, ApiStyle::Anthropic);
    }

    #[test]
    fn unknown_provider_degrades_to_heuristic() {
        let registry = ProviderRegistry::with_default_specs();
        let config = AppConfig { provider: "does-not-exist".into(), ..AppConfig::default() };
        let client = registry.create_client(&config);
        assert_eq!(client.name(), "heuristic");
    }

    #[test]
    fn missing_key_degrades_to_heuristic() {
        let registry = ProviderRegistry::with_default_specs();
        let config = AppConfig {
            provider: "openrouter".into(),
            api_key_env: Some("PICOAGENT_TEST_KEY_THAT_IS_UNSET".into()),
            ..AppConfig::default()
        };
        let client = registry.create_client(&config);
        assert_eq!(client.name(), "heuristic");
    }

    #[test]
    fn present_key_builds_wrapped_client() {
        std::env::set_var("PICOAGENT_TEST_ROUTER_KEY", "sk-test");
        let registry = ProviderRegistry::with_default_specs();
        let config = AppConfig {
            provider: "openrouter".into(),
            api_key_env: Some("PICOAGENT_TEST_ROUTER_KEY".into()),
            ..AppConfig::default()
        };
        let client = registry.create_client(&config);
        assert_eq!(client.name(), "openrouter+heuristic");
        std::env::remove_var("PICOAGENT_TEST_ROUTER_KEY");
    }
}
