use futures::future::join_all;
use parley_core::config::AgentDefaults;
use parley_core::sink::deliver;
use parley_core::types::{
    AssistantTurn, Attachment, ContentPart, Message, ModelParams, Role, ToolCall, ToolResult,
    ToolSchema,
};
use parley_core::{Error, HistoryStore, OutputSink, Result};
use parley_providers::Provider;
use parley_tools::{Tool, ToolContext, ToolRegistry, Toolset};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::activator::CapabilityActivator;
use crate::context::InstructionComposer;

/// Store key naming the backend a context talks to.
pub const PROVIDER_KEY: &str = "provider";

/// Outcome of one completed turn. The caller decides whether to persist `thread`.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub provider: String,
    pub thread: Vec<Message>,
    pub final_text: Option<String>,
    /// Tool rounds executed.
    pub rounds: u32,
    /// Rounds in which at least one tool failed.
    pub error_rounds: u32,
}

/// Releases the context from the busy set when dropped, whatever the exit path.
struct TurnGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    context_id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        busy.remove(&self.context_id);
    }
}

/// Drives one user turn: model request, tool rounds, final answer.
pub struct ConversationOrchestrator {
    defaults: AgentDefaults,
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
    registry: Arc<ToolRegistry>,
    activator: Arc<CapabilityActivator>,
    store: Arc<dyn HistoryStore>,
    sink: Arc<dyn OutputSink>,
    composer: Arc<dyn InstructionComposer>,
    busy: Arc<Mutex<HashSet<String>>>,
}

impl ConversationOrchestrator {
    pub fn new(
        defaults: AgentDefaults,
        store: Arc<dyn HistoryStore>,
        sink: Arc<dyn OutputSink>,
        composer: Arc<dyn InstructionComposer>,
        registry: Arc<ToolRegistry>,
        activator: Arc<CapabilityActivator>,
    ) -> Self {
        Self {
            defaults,
            providers: HashMap::new(),
            default_provider: String::new(),
            registry,
            activator,
            store,
            sink,
            composer,
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_providers(
        mut self,
        providers: HashMap<String, Arc<dyn Provider>>,
        default_provider: &str,
    ) -> Self {
        self.providers = providers;
        self.default_provider = default_provider.to_string();
        self
    }

    pub fn is_busy(&self, context_id: &str) -> bool {
        let busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        busy.contains(context_id)
    }

    fn try_acquire(&self, context_id: &str) -> Result<TurnGuard> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(context_id.to_string()) {
            return Err(Error::ConcurrentRequest(context_id.to_string()));
        }
        Ok(TurnGuard {
            busy: self.busy.clone(),
            context_id: context_id.to_string(),
        })
    }

    /// Backend for a context: its stored choice, else the configured default.
    pub async fn provider_for(&self, context_id: &str) -> Result<(String, Arc<dyn Provider>)> {
        let name = self
            .store
            .get_key(context_id, PROVIDER_KEY)
            .await?
            .unwrap_or_else(|| self.default_provider.clone());
        let provider = self.providers.get(&name).cloned().ok_or_else(|| {
            Error::Config(format!("provider '{}' is not configured", name))
        })?;
        Ok((name, provider))
    }

    async fn model_params(&self, context_id: &str) -> Result<ModelParams> {
        let model = self
            .store
            .get_default_model(context_id)
            .await?
            .unwrap_or_else(|| self.defaults.model.clone());
        let mut params = ModelParams::new(&model);
        params.max_tokens = self.defaults.max_tokens;
        params.temperature = Some(self.defaults.temperature);
        params.reasoning_effort = self.defaults.reasoning_effort.clone();
        Ok(params)
    }

    async fn current_toolset(&self, context_id: &str) -> Result<Toolset> {
        let capability = self.activator.active(context_id).await?;
        Ok(self.registry.toolset(&capability))
    }

    pub async fn run_turn(
        &self,
        context_id: &str,
        input: &str,
        attachment: Option<Attachment>,
    ) -> Result<TurnResult> {
        let _guard = self.try_acquire(context_id)?;
        let (provider_name, provider) = self.provider_for(context_id).await?;

        let attachment_part = match &attachment {
            Some(a) => Some(provider.ingest_attachment(a).await?),
            None => None,
        };

        let mut thread = self.store.load_thread(context_id, &provider_name).await?;
        if thread.is_empty() {
            let instructions = self.composer.compose(context_id).await?;
            thread.push(Message::system(&instructions));
        }
        let mut parts = vec![ContentPart::text(input)];
        parts.extend(attachment_part);
        thread.push(Message::new(Role::User, parts));

        let params = self.model_params(context_id).await?;
        let mut toolset = self.current_toolset(context_id).await?;

        info!(
            context = %context_id,
            provider = %provider_name,
            model = %params.model,
            capability = %toolset.capability,
            history_len = thread.len(),
            "Starting turn"
        );

        let mut turn = self
            .complete_with_recovery(provider.as_ref(), &mut thread, &toolset.schemas(), &params)
            .await?;

        let max_rounds = self.defaults.max_tool_rounds;
        let mut rounds = 0u32;
        let mut error_rounds = 0u32;

        while turn.has_tool_calls() {
            if rounds >= max_rounds {
                warn!(context = %context_id, max_rounds, "Tool round limit reached, aborting turn");
                return Err(Error::TooManyToolRounds(max_rounds));
            }
            rounds += 1;

            thread.push(turn.to_message());
            if let Some(text) = turn.visible_text() {
                deliver(self.sink.as_ref(), context_id, text).await;
            }

            let results = self
                .execute_tool_calls(context_id, &turn.tool_calls, &toolset)
                .await;
            if results.iter().any(ToolResult::is_error) {
                error_rounds += 1;
                warn!(context = %context_id, round = rounds, "Tool round finished with errors");
            }
            thread.extend(results.into_iter().map(Message::tool_result));

            // A tool call may have switched capability.
            toolset = self.current_toolset(context_id).await?;
            turn = self
                .complete_with_recovery(provider.as_ref(), &mut thread, &toolset.schemas(), &params)
                .await?;
        }

        let final_text = turn.visible_text().map(str::to_string);
        if let Some(text) = &final_text {
            deliver(self.sink.as_ref(), context_id, text).await;
        }
        thread.push(turn.to_message());

        info!(
            context = %context_id,
            rounds,
            error_rounds,
            thread_len = thread.len(),
            "Turn complete"
        );

        Ok(TurnResult {
            provider: provider_name,
            thread,
            final_text,
            rounds,
            error_rounds,
        })
    }

    /// Resolve every call in emission order, then run them concurrently.
    /// Results come back in emission order regardless of completion order.
    async fn execute_tool_calls(
        &self,
        context_id: &str,
        calls: &[ToolCall],
        toolset: &Toolset,
    ) -> Vec<ToolResult> {
        let mut resolved = Vec::with_capacity(calls.len());
        for call in calls {
            resolved.push(self.resolve_tool(context_id, &call.name, toolset).await);
        }

        let tool_ctx = ToolContext {
            context_id: context_id.to_string(),
            store: self.store.clone(),
        };
        let tool_ctx = &tool_ctx;

        let pending = calls.iter().zip(resolved).map(|(call, tool)| async move {
            let tool = match tool {
                Ok(tool) => tool,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool unavailable");
                    return ToolResult::error(call, e.to_string());
                }
            };
            debug!(tool = %call.name, call_id = %call.id, "Invoking tool");
            match tool.invoke(tool_ctx, &call.arguments).await {
                Ok(payload) => ToolResult::success(call, payload),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool failed");
                    ToolResult::error(call, e.to_string())
                }
            }
        });
        join_all(pending).await
    }

    /// Find a tool in the active toolset, or activate the capability that owns it.
    async fn resolve_tool(
        &self,
        context_id: &str,
        name: &str,
        toolset: &Toolset,
    ) -> Result<Arc<dyn Tool>> {
        if let Ok(tool) = toolset.get(name) {
            return Ok(tool.clone());
        }

        let capability = self
            .registry
            .capability_for_tool(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?
            .to_string();
        match self.activator.ensure_active(context_id, &capability).await {
            Ok(activation) if activation.switched => {
                info!(context = %context_id, tool = %name, capability = %capability, "Tool call switched capability");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(context = %context_id, capability = %capability, error = %e, "Capability activation for tool failed");
            }
        }
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// One backend request with the recovery policy shared by every adapter.
    async fn complete_with_recovery(
        &self,
        provider: &dyn Provider,
        thread: &mut [Message],
        tools: &[ToolSchema],
        params: &ModelParams,
    ) -> Result<AssistantTurn> {
        let max_retries = self.defaults.llm_max_retries;
        let base_delay_ms = self.defaults.llm_retry_delay_ms;
        let mut attempt = 0u32;
        let mut rate_limited = false;
        let mut sanitized = false;

        loop {
            let err = match provider.complete(thread, tools, params).await {
                Ok(turn) => {
                    if attempt > 0 {
                        info!(attempt, provider = %provider.name(), "LLM call succeeded after retry");
                    }
                    return Ok(turn);
                }
                Err(e) => e,
            };

            match err {
                Error::ProviderTransient(msg) if attempt < max_retries => {
                    attempt += 1;
                    let delay_ms = backoff_delay_ms(base_delay_ms, attempt);
                    warn!(error = %msg, attempt, max_retries, delay_ms, "Retrying LLM call after transient error");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Error::ProviderRateLimited { message, retry_after } if !rate_limited => {
                    rate_limited = true;
                    let delay = retry_after
                        .unwrap_or_else(|| Duration::from_millis(self.defaults.rate_limit_delay_ms));
                    warn!(error = %message, delay_ms = delay.as_millis() as u64, "Rate limited, waiting before one retry");
                    tokio::time::sleep(delay).await;
                }
                Error::ProviderPermissionDenied(msg) if !sanitized => {
                    sanitized = true;
                    let expired: usize = thread.iter_mut().map(Message::expire_attachments).sum();
                    if expired == 0 {
                        warn!(error = %msg, "Permission denied and no attachments to strip");
                        return Err(Error::ProviderPermissionDenied(msg));
                    }
                    warn!(error = %msg, expired, "Permission denied, retrying without attachments");
                }
                other => {
                    warn!(error = %other, provider = %provider.name(), "LLM call failed");
                    return Err(other);
                }
            }
        }
    }
}

/// Exponential backoff for retry `attempt` (1-based), doubling up to 16x the base.
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::config::CapabilitiesConfig;
    use parley_core::ToolError;
    use parley_scheduler::AutoReturnScheduler;
    use parley_storage::InMemoryHistoryStore;
    use serde_json::{json, Map, Value};
    use tokio::sync::Notify;

    use crate::context::StaticComposer;
    use crate::testing::{FixedPriceTool, RecordingSink, ScriptedProvider};

    /// Blocks inside `complete` until released.
    #[derive(Default)]
    struct GatedProvider {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Provider for GatedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn ingest_attachment(&self, attachment: &Attachment) -> Result<ContentPart> {
            Ok(ContentPart::Attachment(attachment.to_ref()))
        }

        async fn complete(
            &self,
            _thread: &[Message],
            _tools: &[ToolSchema],
            _params: &ModelParams,
        ) -> Result<AssistantTurn> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(AssistantTurn::text("finished"))
        }
    }

    struct SlowTool {
        name: &'static str,
        delay: Duration,
        finished: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.name.to_string(),
                description: "Waits, then answers".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn invoke(
            &self,
            _ctx: &ToolContext,
            _args: &Map<String, Value>,
        ) -> std::result::Result<Value, ToolError> {
            tokio::time::sleep(self.delay).await;
            self.finished.lock().unwrap().push(self.name);
            Ok(json!({"tool": self.name}))
        }
    }

    struct Harness {
        orchestrator: Arc<ConversationOrchestrator>,
        store: Arc<InMemoryHistoryStore>,
        sink: Arc<RecordingSink>,
        activator: Arc<CapabilityActivator>,
    }

    fn harness(provider: Arc<dyn Provider>, registry: ToolRegistry) -> Harness {
        let mut defaults = AgentDefaults::default();
        defaults.model = "scripted-model".to_string();
        defaults.llm_retry_delay_ms = 100;
        defaults.rate_limit_delay_ms = 1000;

        let store = Arc::new(InMemoryHistoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(AutoReturnScheduler::new(store.clone(), None, "chat"));
        let activator = Arc::new(CapabilityActivator::new(
            store.clone(),
            scheduler,
            CapabilitiesConfig::default(),
        ));
        let orchestrator = ConversationOrchestrator::new(
            defaults,
            store.clone(),
            sink.clone(),
            Arc::new(StaticComposer("be brief".to_string())),
            Arc::new(registry),
            activator.clone(),
        )
        .with_providers(HashMap::from([("scripted".to_string(), provider)]), "scripted");

        Harness {
            orchestrator: Arc::new(orchestrator),
            store,
            sink,
            activator,
        }
    }

    fn roles(thread: &[Message]) -> Vec<Role> {
        thread.iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn test_plain_turn_seeds_instructions() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(AssistantTurn::text("hello!"))]));
        let h = harness(provider.clone(), ToolRegistry::default());

        let result = h.orchestrator.run_turn("cli:a", "hi", None).await.unwrap();
        assert_eq!(roles(&result.thread), vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(result.thread[0].text(), "be brief");
        assert_eq!(result.final_text.as_deref(), Some("hello!"));
        assert_eq!(result.rounds, 0);
        assert_eq!(h.sink.texts(), vec!["hello!".to_string()]);

        // base toolset only while on the default capability
        assert_eq!(provider.request(0).1, vec!["current_time".to_string()]);
        // the orchestrator never persists
        assert!(h.store.load_thread("cli:a", "scripted").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saved_thread_is_continued() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let h = harness(provider.clone(), ToolRegistry::default());
        let saved = vec![Message::system("old rules"), Message::user("a"), Message::assistant("b")];
        h.store.save_thread("cli:a", "scripted", &saved).await.unwrap();

        let result = h.orchestrator.run_turn("cli:a", "c", None).await.unwrap();
        assert_eq!(result.thread.len(), 5);
        assert_eq!(result.thread[0].text(), "old rules");
        assert_eq!(provider.request(0).0.len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_turn_rejected() {
        let provider = Arc::new(GatedProvider::default());
        let h = harness(provider.clone(), ToolRegistry::default());

        let orchestrator = h.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.run_turn("cli:a", "one", None).await });
        provider.entered.notified().await;

        assert!(h.orchestrator.is_busy("cli:a"));
        let second = h.orchestrator.run_turn("cli:a", "two", None).await;
        assert!(matches!(second, Err(Error::ConcurrentRequest(_))));

        provider.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.final_text.as_deref(), Some("finished"));
        assert!(!h.orchestrator.is_busy("cli:a"));
    }

    #[tokio::test]
    async fn test_busy_released_on_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(Error::Provider("boom".into()))]));
        let h = harness(provider, ToolRegistry::default());

        assert!(h.orchestrator.run_turn("cli:a", "x", None).await.is_err());
        assert!(!h.orchestrator.is_busy("cli:a"));
        assert!(h.orchestrator.run_turn("cli:a", "y", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_tool_round_limit() {
        let call = ToolCall::new("call_1", "current_time", json!({}));
        let provider = Arc::new(ScriptedProvider {
            fallback: Some(AssistantTurn::with_tool_calls(None, vec![call])),
            ..Default::default()
        });
        let h = harness(provider.clone(), ToolRegistry::default());

        let err = h.orchestrator.run_turn("cli:a", "loop", None).await.unwrap_err();
        assert!(matches!(err, Error::TooManyToolRounds(16)));
        assert_eq!(provider.calls(), 17);
        assert!(!h.orchestrator.is_busy("cli:a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_results_keep_emission_order() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        for (name, ms) in [("tool_a", 50), ("tool_b", 10)] {
            registry.register(Arc::new(SlowTool {
                name,
                delay: Duration::from_millis(ms),
                finished: finished.clone(),
            }));
        }
        registry.bind("chat", vec!["tool_a".to_string(), "tool_b".to_string()]);
        registry.set_base("chat");

        let a = ToolCall::new("call_a", "tool_a", json!({}));
        let b = ToolCall::new("call_b", "tool_b", json!({}));
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(AssistantTurn::with_tool_calls(Some("working on it"), vec![a, b])),
            Ok(AssistantTurn::text("both done")),
        ]));
        let h = harness(provider, registry);

        let result = h.orchestrator.run_turn("cli:a", "go", None).await.unwrap();
        assert_eq!(*finished.lock().unwrap(), vec!["tool_b", "tool_a"]);
        assert_eq!(
            roles(&result.thread),
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(result.thread[3].tool_results()[0].call_id, "call_a");
        assert_eq!(result.thread[4].tool_results()[0].call_id, "call_b");
        assert_eq!(result.rounds, 1);
        assert_eq!(
            h.sink.texts(),
            vec!["working on it".to_string(), "both done".to_string()]
        );
    }

    #[tokio::test]
    async fn test_tool_from_other_capability_activates_it() {
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(FixedPriceTool));
        let call = ToolCall::new("call_1", "crypto_price", json!({"symbol": "btc"}));
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(AssistantTurn::with_tool_calls(None, vec![call])),
            Ok(AssistantTurn::text("BTC is $64,000")),
        ]));
        let h = harness(provider.clone(), registry);

        let result = h.orchestrator.run_turn("cli:a", "btc?", None).await.unwrap();
        assert_eq!(result.error_rounds, 0);
        assert_eq!(h.activator.active("cli:a").await.unwrap(), "price");
        assert!(!provider.request(0).1.contains(&"crypto_price".to_string()));
        assert!(provider.request(1).1.contains(&"crypto_price".to_string()));
        assert_eq!(
            result.thread[3].tool_results()[0].content_value()["usd"],
            json!(64000.0)
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let call = ToolCall::new("call_1", "teleport", json!({}));
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(AssistantTurn::with_tool_calls(None, vec![call])),
            Ok(AssistantTurn::text("I can't do that")),
        ]));
        let h = harness(provider, ToolRegistry::default());

        let result = h.orchestrator.run_turn("cli:a", "beam me up", None).await.unwrap();
        assert_eq!(result.error_rounds, 1);
        let tool_msg = &result.thread[3];
        assert!(tool_msg.tool_results()[0].is_error());
        assert!(tool_msg.tool_results()[0].content_text().contains("teleport"));
        assert_eq!(h.activator.active("cli:a").await.unwrap(), "chat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(Error::ProviderTransient("502".into())),
            Err(Error::ProviderTransient("timeout".into())),
            Ok(AssistantTurn::text("recovered")),
        ]));
        let h = harness(provider.clone(), ToolRegistry::default());

        let started = tokio::time::Instant::now();
        let result = h.orchestrator.run_turn("cli:a", "hi", None).await.unwrap();
        assert_eq!(result.final_text.as_deref(), Some("recovered"));
        assert_eq!(provider.calls(), 3);
        // 100ms then 200ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay_ms(500, 1), 500);
        assert_eq!(backoff_delay_ms(500, 3), 2000);
        assert_eq!(backoff_delay_ms(500, 9), 8000);
        assert_eq!(backoff_delay_ms(u64::MAX, 2), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retries_exhausted() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..5)
                .map(|_| Err(Error::ProviderTransient("503".into())))
                .collect(),
        ));
        let h = harness(provider.clone(), ToolRegistry::default());

        let err = h.orchestrator.run_turn("cli:a", "hi", None).await.unwrap_err();
        assert!(matches!(err, Error::ProviderTransient(_)));
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried_once() {
        let limited = || Error::ProviderRateLimited {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(limited()),
            Ok(AssistantTurn::text("ok")),
        ]));
        let h = harness(provider.clone(), ToolRegistry::default());
        let started = tokio::time::Instant::now();
        assert!(h.orchestrator.run_turn("cli:a", "hi", None).await.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(2));

        let provider = Arc::new(ScriptedProvider::new(vec![Err(limited()), Err(limited())]));
        let h = harness(provider.clone(), ToolRegistry::default());
        let err = h.orchestrator.run_turn("cli:a", "hi", None).await.unwrap_err();
        assert!(matches!(err, Error::ProviderRateLimited { .. }));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_permission_denied_strips_attachments() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(Error::ProviderPermissionDenied("file expired".into())),
            Ok(AssistantTurn::text("I can no longer see the image")),
        ]));
        let h = harness(provider.clone(), ToolRegistry::default());
        let image = Attachment::inline("cat.png", "image/png", vec![1, 2, 3]);

        let result = h
            .orchestrator
            .run_turn("cli:a", "what is this", Some(image))
            .await
            .unwrap();
        assert_eq!(provider.calls(), 2);
        assert!(provider.request(0).0[1].has_attachments());
        let retried_user = &provider.request(1).0[1];
        assert!(!retried_user.has_attachments());
        assert!(retried_user.text().contains("[attachment expired: cat.png]"));
        assert!(!result.thread[1].has_attachments());
    }

    #[tokio::test]
    async fn test_permission_denied_without_attachments_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            Error::ProviderPermissionDenied("bad key".into()),
        )]));
        let h = harness(provider.clone(), ToolRegistry::default());
        let err = h.orchestrator.run_turn("cli:a", "hi", None).await.unwrap_err();
        assert!(matches!(err, Error::ProviderPermissionDenied(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_content_blocked_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(Error::ProviderContentBlocked("policy".into())),
            Ok(AssistantTurn::text("never reached")),
        ]));
        let h = harness(provider.clone(), ToolRegistry::default());
        let err = h.orchestrator.run_turn("cli:a", "hi", None).await.unwrap_err();
        assert!(matches!(err, Error::ProviderContentBlocked(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_config_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let h = harness(provider, ToolRegistry::default());
        h.store.set_key("cli:a", PROVIDER_KEY, "nowhere").await.unwrap();
        let err = h.orchestrator.run_turn("cli:a", "hi", None).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
