use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Per-provider proxy. `Some("")` forces a direct connection.
    #[serde(default)]
    pub proxy: Option<String>,
}

/// How a conversation context id is derived from an inbound message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextScope {
    /// One context per chat (group chats share a thread).
    #[default]
    Chat,
    /// One context per sender, across chats.
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    /// Backend used for new contexts. Inferred from the model when unset.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_llm_retry_delay_ms")]
    pub llm_retry_delay_ms: u64,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    #[serde(default)]
    pub context_scope: ContextScope,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tool_rounds() -> u32 {
    16
}

fn default_llm_max_retries() -> u32 {
    3
}

fn default_llm_retry_delay_ms() -> u64 {
    2000
}

fn default_rate_limit_delay_ms() -> u64 {
    5000
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            provider: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            reasoning_effort: None,
            max_tool_rounds: default_max_tool_rounds(),
            llm_max_retries: default_llm_max_retries(),
            llm_retry_delay_ms: default_llm_retry_delay_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            context_scope: ContextScope::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
}

/// One capability: a bundle of tools plus the rules used to detect it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Seconds before auto-return to the default capability.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Confidence required before the classifier selects this capability.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub strong_keywords: Vec<String>,
    /// Regular expressions that count as strong matches.
    #[serde(default)]
    pub strong_patterns: Vec<String>,
    #[serde(default)]
    pub weak_keywords: Vec<String>,
    #[serde(default = "default_min_weak_matches")]
    pub min_weak_matches: usize,
}

fn default_threshold() -> f32 {
    0.6
}

fn default_min_weak_matches() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesConfig {
    #[serde(default = "default_capability")]
    pub default: String,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_suggestion_cooldown_secs")]
    pub suggestion_cooldown_secs: u64,
    #[serde(default = "default_repetition_window_secs")]
    pub repetition_window_secs: u64,
    /// Confidence multiplier lost per recent auto-activation of the same capability.
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
    #[serde(default = "default_catalog")]
    pub catalog: BTreeMap<String, CapabilityConfig>,
}

fn default_capability() -> String {
    "chat".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_suggestion_cooldown_secs() -> u64 {
    30
}

fn default_repetition_window_secs() -> u64 {
    600
}

fn default_repetition_penalty() -> f32 {
    0.15
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_catalog() -> BTreeMap<String, CapabilityConfig> {
    let mut catalog = BTreeMap::new();
    catalog.insert(
        "chat".to_string(),
        CapabilityConfig {
            description: "General conversation".to_string(),
            tools: strings(&["current_time"]),
            threshold: 1.0,
            min_weak_matches: default_min_weak_matches(),
            ..Default::default()
        },
    );
    catalog.insert(
        "memory".to_string(),
        CapabilityConfig {
            description: "Save and recall personal notes".to_string(),
            tools: strings(&["remember", "recall"]),
            timeout_secs: Some(600),
            threshold: 0.5,
            strong_keywords: strings(&["remember that", "don't forget", "note that", "what did i tell you"]),
            strong_patterns: Vec::new(),
            weak_keywords: strings(&["remember", "note", "forget", "recall", "notes"]),
            min_weak_matches: 1,
        },
    );
    catalog.insert(
        "price".to_string(),
        CapabilityConfig {
            description: "Live cryptocurrency prices".to_string(),
            tools: strings(&["crypto_price"]),
            timeout_secs: Some(300),
            threshold: 0.7,
            strong_keywords: strings(&["price of", "bitcoin", "ethereum", "solana", "dogecoin"]),
            strong_patterns: strings(&[r"(?i)\b(btc|eth|sol|doge|xrp|usdt)\b"]),
            weak_keywords: strings(&["price", "coin", "crypto", "market", "worth", "trading"]),
            min_weak_matches: 2,
        },
    );
    catalog.insert(
        "currency".to_string(),
        CapabilityConfig {
            description: "Fiat currency conversion".to_string(),
            tools: strings(&["currency_convert"]),
            timeout_secs: Some(300),
            threshold: 0.75,
            strong_keywords: strings(&["exchange rate", "convert currency"]),
            strong_patterns: strings(&[r"(?i)\b\d+(\.\d+)?\s?(usd|eur|gbp|jpy|cny|chf|cad|aud)\b"]),
            weak_keywords: strings(&["convert", "dollar", "euro", "yen", "pound", "currency"]),
            min_weak_matches: 2,
        },
    );
    catalog
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            default: default_capability(),
            default_timeout_secs: default_timeout_secs(),
            suggestion_cooldown_secs: default_suggestion_cooldown_secs(),
            repetition_window_secs: default_repetition_window_secs(),
            repetition_penalty: default_repetition_penalty(),
            catalog: default_catalog(),
        }
    }
}

impl CapabilitiesConfig {
    /// Auto-return timeout for a capability; unknown capabilities fall back to the default.
    pub fn timeout_for(&self, capability: &str) -> u64 {
        self.catalog
            .get(capability)
            .and_then(|c| c.timeout_secs)
            .unwrap_or(self.default_timeout_secs)
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.catalog.contains_key(capability)
    }

    /// First capability (in name order) that bundles the given tool.
    pub fn capability_for_tool(&self, tool: &str) -> Option<&str> {
        self.catalog
            .iter()
            .find(|(_, c)| c.tools.iter().any(|t| t == tool))
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let caps = &self.capabilities;
        if !caps.contains(&caps.default) {
            return Err(Error::Config(format!(
                "default capability '{}' is not in the capability catalog",
                caps.default
            )));
        }
        for (name, cap) in &caps.catalog {
            if !(0.0..=1.0).contains(&cap.threshold) {
                return Err(Error::Config(format!(
                    "capability '{}' threshold {} is outside [0, 1]",
                    name, cap.threshold
                )));
            }
        }
        if !(0.0..=1.0).contains(&caps.repetition_penalty) {
            return Err(Error::Config(format!(
                "repetitionPenalty {} is outside [0, 1]",
                caps.repetition_penalty
            )));
        }
        if self.agents.defaults.max_tool_rounds == 0 {
            return Err(Error::Config("maxToolRounds must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Names of providers that have credentials (ollama needs none).
    pub fn configured_providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .providers
            .iter()
            .filter(|(name, p)| !p.api_key.is_empty() || name.as_str() == "ollama")
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort();
        names
    }
}
