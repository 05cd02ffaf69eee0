use parley_core::config::ProviderConfig;
use parley_core::{Config, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::client::HttpSettings;
use crate::{AnthropicProvider, GeminiProvider, OllamaProvider, OpenAIProvider, Provider};

/// Default api_base for OpenAI-compatible providers.
fn default_api_base(provider_name: &str) -> &'static str {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "zhipu" => "https://open.bigmodel.cn/api/paas/v4",
        "kimi" | "moonshot" => "https://api.moonshot.cn/v1",
        "vllm" => "http://localhost:8000/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Infer the provider from a model name. `None` means the prefix is not recognized.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    if model.starts_with("anthropic/") || model.starts_with("claude-") {
        Some("anthropic")
    } else if model.starts_with("gemini/") || model.starts_with("gemini-") {
        Some("gemini")
    } else if model.starts_with("ollama/") {
        Some("ollama")
    } else if model.starts_with("kimi") || model.starts_with("moonshot") {
        Some("kimi")
    } else if model.starts_with("openai/")
        || model.starts_with("gpt-")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        Some("openai")
    } else if model.starts_with("deepseek") {
        Some("deepseek")
    } else if model.starts_with("groq/") {
        Some("groq")
    } else if model.starts_with("openrouter/") {
        Some("openrouter")
    } else {
        None
    }
}

/// Resolve the default provider name.
///
/// Order:
/// 1. `agents.defaults.provider`
/// 2. prefix of `agents.defaults.model`
/// 3. first configured provider in priority order
pub fn default_provider_name(config: &Config) -> Result<String> {
    if let Some(explicit) = &config.agents.defaults.provider {
        return Ok(explicit.clone());
    }
    if let Some(inferred) = infer_provider_from_model(&config.agents.defaults.model) {
        return Ok(inferred.to_string());
    }
    let priority = [
        "anthropic", "openai", "openrouter", "deepseek", "kimi", "gemini", "zhipu", "groq",
        "vllm", "ollama",
    ];
    let configured = config.configured_providers();
    priority
        .iter()
        .find(|name| configured.contains(name))
        .map(|name| name.to_string())
        .ok_or_else(|| {
            Error::Config(
                "No LLM provider configured. Set agents.defaults.provider, use a recognized model \
                 prefix (e.g. 'claude-...', 'gpt-4o', 'gemini-...'), or add an API key under providers."
                    .to_string(),
            )
        })
}

fn http_settings(config: &Config, provider_cfg: &ProviderConfig, timeout: Duration) -> HttpSettings {
    HttpSettings {
        provider_proxy: provider_cfg.proxy.clone(),
        global_proxy: config.network.proxy.clone(),
        no_proxy: config.network.no_proxy.clone(),
        timeout,
    }
}

/// Build the adapter for one provider name.
///
/// Every provider except ollama needs a `providers.<name>` entry with an API key.
pub fn create_provider(config: &Config, name: &str) -> Result<Arc<dyn Provider>> {
    let empty_cfg = ProviderConfig::default();
    let provider_cfg = match config.get_provider(name) {
        Some(cfg) => cfg,
        None if name == "ollama" => &empty_cfg,
        None => {
            return Err(Error::Config(format!(
                "Provider '{}' is not found in the providers section",
                name
            )))
        }
    };
    if name != "ollama" && provider_cfg.api_key.is_empty() {
        return Err(Error::Config(format!("Provider '{}' has no API key", name)));
    }

    let api_base = provider_cfg.api_base.as_deref();
    let provider: Arc<dyn Provider> = match name {
        "anthropic" => Arc::new(AnthropicProvider::with_settings(
            &provider_cfg.api_key,
            api_base,
            &http_settings(config, provider_cfg, Duration::from_secs(120)),
        )),
        "gemini" => Arc::new(GeminiProvider::with_settings(
            &provider_cfg.api_key,
            api_base,
            &http_settings(config, provider_cfg, Duration::from_secs(120)),
        )),
        "ollama" => Arc::new(OllamaProvider::with_settings(
            api_base,
            &http_settings(config, provider_cfg, Duration::from_secs(300)),
        )),
        // OpenAI-compatible: openai, openrouter, deepseek, groq, zhipu, vllm, kimi, moonshot
        _ => Arc::new(OpenAIProvider::with_settings(
            name,
            &provider_cfg.api_key,
            Some(api_base.unwrap_or_else(|| default_api_base(name))),
            &http_settings(config, provider_cfg, Duration::from_secs(120)),
        )),
    };
    info!(provider = %name, "Provider initialized");
    Ok(provider)
}

/// Build every configured provider, skipping (and logging) the ones that fail.
pub fn create_providers(config: &Config) -> HashMap<String, Arc<dyn Provider>> {
    let mut providers = HashMap::new();
    for name in config.configured_providers() {
        match create_provider(config, name) {
            Ok(p) => {
                providers.insert(name.to_string(), p);
            }
            Err(e) => warn!(provider = %name, error = %e, "Skipping provider"),
        }
    }
    providers
}
