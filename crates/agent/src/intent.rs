use parley_core::config::CapabilitiesConfig;
use parley_core::types::IntentSignal;
use parley_core::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const STRONG_BASE: f32 = 0.8;
const STRONG_STEP: f32 = 0.05;
const WEAK_BASE: f32 = 0.45;
const WEAK_STEP: f32 = 0.1;
const WEAK_CAP: f32 = 0.75;

struct IntentRule {
    capability: String,
    strong_keywords: Vec<String>,
    strong_patterns: Vec<Regex>,
    weak_keywords: Vec<String>,
    min_weak_matches: usize,
    threshold: f32,
}

impl IntentRule {
    fn confidence(&self, text: &str, lower: &str) -> f32 {
        let strong = self
            .strong_keywords
            .iter()
            .filter(|k| lower.contains(k.as_str()))
            .count()
            + self.strong_patterns.iter().filter(|p| p.is_match(text)).count();
        let weak = self
            .weak_keywords
            .iter()
            .filter(|k| lower.contains(k.as_str()))
            .count();

        if strong > 0 {
            let extra = (strong - 1) as f32;
            (STRONG_BASE + STRONG_STEP * extra + STRONG_STEP * weak as f32).min(1.0)
        } else if weak == 0 || weak < self.min_weak_matches {
            0.0
        } else {
            let extra = weak.saturating_sub(self.min_weak_matches.max(1)) as f32;
            (WEAK_BASE + WEAK_STEP * extra).min(WEAK_CAP)
        }
    }
}

/// How many times each capability was auto-activated recently for one user.
#[derive(Debug, Clone, Default)]
pub struct PriorActivations {
    counts: HashMap<String, u32>,
}

impl PriorActivations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, capability: &str) {
        *self.counts.entry(capability.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, capability: &str) -> u32 {
        self.counts.get(capability).copied().unwrap_or(0)
    }
}

/// Keyword and pattern scoring of user text against the capability catalog.
/// Stateless: history is passed in as [`PriorActivations`].
pub struct IntentClassifier {
    rules: Vec<IntentRule>,
    repetition_penalty: f32,
}

impl IntentClassifier {
    /// One rule per non-default capability. Invalid patterns are a config error.
    pub fn from_config(capabilities: &CapabilitiesConfig) -> Result<Self> {
        let lower = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let mut rules = Vec::new();
        for (name, cap) in &capabilities.catalog {
            if *name == capabilities.default {
                continue;
            }
            let strong_patterns = cap
                .strong_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        Error::Config(format!("capability '{}': bad pattern '{}': {}", name, p, e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            rules.push(IntentRule {
                capability: name.clone(),
                strong_keywords: lower(&cap.strong_keywords),
                strong_patterns,
                weak_keywords: lower(&cap.weak_keywords),
                min_weak_matches: cap.min_weak_matches,
                threshold: cap.threshold,
            });
        }

        Ok(Self {
            rules,
            repetition_penalty: capabilities.repetition_penalty.clamp(0.0, 1.0),
        })
    }

    /// One signal per non-default capability, highest confidence first.
    pub fn score(&self, text: &str, prior: &PriorActivations) -> Vec<IntentSignal> {
        let lower = text.to_lowercase();
        let mut signals: Vec<IntentSignal> = self
            .rules
            .iter()
            .map(|rule| {
                let recent = prior.count(&rule.capability) as f32;
                let penalty = (1.0 - self.repetition_penalty * recent).max(0.0);
                let confidence = (rule.confidence(text, &lower) * penalty).clamp(0.0, 1.0);
                IntentSignal {
                    capability: rule.capability.clone(),
                    confidence,
                    selected: confidence > 0.0 && confidence >= rule.threshold,
                }
            })
            .collect();
        signals.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        signals
    }

    /// Best selected signal, if any.
    pub fn best(&self, text: &str, prior: &PriorActivations) -> Option<IntentSignal> {
        self.score(text, prior).into_iter().find(|s| s.selected)
    }
}

#[derive(Default)]
struct GateState {
    activations: HashMap<String, Vec<(String, Instant)>>,
    last_suggestion: HashMap<String, Instant>,
}

/// Rate limiting around the classifier: at most one suggestion per context
/// per cooldown, with repeated auto-activations for a user penalised.
pub struct SuggestionGate {
    classifier: IntentClassifier,
    cooldown: Duration,
    window: Duration,
    state: Mutex<GateState>,
}

impl SuggestionGate {
    pub fn new(classifier: IntentClassifier, capabilities: &CapabilitiesConfig) -> Self {
        Self {
            classifier,
            cooldown: Duration::from_secs(capabilities.suggestion_cooldown_secs),
            window: Duration::from_secs(capabilities.repetition_window_secs),
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn suggest(&self, context_id: &str, user_id: &str, text: &str) -> Option<IntentSignal> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(last) = state.last_suggestion.get(context_id) {
            if now.duration_since(*last) < self.cooldown {
                debug!(context = %context_id, "Suggestion cooldown active, skipping classification");
                return None;
            }
        }

        let prior = Self::prune_and_count(&mut state, user_id, now, self.window);
        let signal = self.classifier.best(text, &prior)?;

        debug!(
            context = %context_id,
            capability = %signal.capability,
            confidence = signal.confidence,
            "Intent selected"
        );
        Some(signal)
    }

    /// Note that a suggestion actually switched the context. Starts the
    /// cooldown and counts towards the user's repetition penalty.
    pub fn record(&self, context_id: &str, user_id: &str, capability: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.last_suggestion.insert(context_id.to_string(), now);
        state
            .activations
            .entry(user_id.to_string())
            .or_default()
            .push((capability.to_string(), now));
    }

    fn prune_and_count(
        state: &mut GateState,
        user_id: &str,
        now: Instant,
        window: Duration,
    ) -> PriorActivations {
        let mut prior = PriorActivations::new();
        if let Some(entries) = state.activations.get_mut(user_id) {
            entries.retain(|(_, at)| now.duration_since(*at) < window);
            for (capability, _) in entries.iter() {
                prior.record(capability);
            }
        }
        prior
    }
}
