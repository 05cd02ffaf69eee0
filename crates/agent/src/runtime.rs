use parley_core::sink::deliver;
use parley_core::types::Attachment;
use parley_core::{Config, Error, HistoryStore, InboundMessage, OutputSink, Paths, Result};
use parley_providers::Provider;
use parley_scheduler::AutoReturnScheduler;
use parley_tools::ToolRegistry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::activator::CapabilityActivator;
use crate::context::{InstructionComposer, WorkspaceComposer};
use crate::intent::{IntentClassifier, SuggestionGate};
use crate::orchestrator::{ConversationOrchestrator, TurnResult};

/// The caller around the orchestrator: classifies the message, activates the
/// suggested capability, runs the turn and persists the thread.
pub struct AgentRuntime {
    config: Config,
    orchestrator: Arc<ConversationOrchestrator>,
    activator: Arc<CapabilityActivator>,
    gate: SuggestionGate,
    store: Arc<dyn HistoryStore>,
    sink: Arc<dyn OutputSink>,
}

impl AgentRuntime {
    pub fn new(
        config: Config,
        paths: Paths,
        store: Arc<dyn HistoryStore>,
        sink: Arc<dyn OutputSink>,
        registry: ToolRegistry,
        providers: HashMap<String, Arc<dyn Provider>>,
        default_provider: &str,
    ) -> Result<Self> {
        let composer: Arc<dyn InstructionComposer> = Arc::new(WorkspaceComposer::new(
            paths,
            store.clone(),
            config.capabilities.clone(),
        ));
        Self::with_composer(config, composer, store, sink, registry, providers, default_provider)
    }

    pub fn with_composer(
        config: Config,
        composer: Arc<dyn InstructionComposer>,
        store: Arc<dyn HistoryStore>,
        sink: Arc<dyn OutputSink>,
        registry: ToolRegistry,
        providers: HashMap<String, Arc<dyn Provider>>,
        default_provider: &str,
    ) -> Result<Self> {
        let capabilities = config.capabilities.clone();
        let scheduler = Arc::new(AutoReturnScheduler::new(
            store.clone(),
            Some(sink.clone()),
            &capabilities.default,
        ));
        let activator = Arc::new(
            CapabilityActivator::new(store.clone(), scheduler, capabilities.clone())
                .with_sink(sink.clone()),
        );
        let gate = SuggestionGate::new(IntentClassifier::from_config(&capabilities)?, &capabilities);
        let orchestrator = ConversationOrchestrator::new(
            config.agents.defaults.clone(),
            store.clone(),
            sink.clone(),
            composer,
            Arc::new(registry),
            activator.clone(),
        )
        .with_providers(providers, default_provider);

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            activator,
            gate,
            store,
            sink,
        })
    }

    pub fn orchestrator(&self) -> &Arc<ConversationOrchestrator> {
        &self.orchestrator
    }

    pub fn activator(&self) -> &Arc<CapabilityActivator> {
        &self.activator
    }

    pub fn gate(&self) -> &SuggestionGate {
        &self.gate
    }

    pub fn context_id(&self, msg: &InboundMessage) -> String {
        msg.context_id(self.config.agents.defaults.context_scope)
    }

    /// Forget every saved thread of a context. The capability stays as is.
    pub async fn clear_history(&self, context_id: &str) -> Result<()> {
        self.store.clear_thread(context_id).await?;
        info!(context = %context_id, "History cleared");
        Ok(())
    }

    /// Run one inbound message to completion. Errors are returned, not reported.
    pub async fn handle_message(&self, msg: InboundMessage) -> Result<TurnResult> {
        let context_id = self.context_id(&msg);

        // A busy context will reject the turn; don't switch capability under it.
        if !self.orchestrator.is_busy(&context_id) {
            if let Some(signal) = self.gate.suggest(&context_id, &msg.sender_id, &msg.content) {
                match self
                    .activator
                    .ensure_active(&context_id, &signal.capability)
                    .await
                {
                    Ok(activation) if activation.switched => {
                        self.gate
                            .record(&context_id, &msg.sender_id, &signal.capability);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(context = %context_id, capability = %signal.capability, error = %e, "Suggested activation failed");
                    }
                }
            }
        }

        if msg.media.len() > 1 {
            warn!(context = %context_id, count = msg.media.len(), "Only the first attachment is used");
        }
        let attachment = match msg.media.first() {
            Some(source) => Some(load_attachment(source).await?),
            None => None,
        };

        let result = self
            .orchestrator
            .run_turn(&context_id, &msg.content, attachment)
            .await?;

        if msg.ephemeral {
            debug!(context = %context_id, "Ephemeral turn, thread not saved");
        } else {
            self.store
                .save_thread(&context_id, &result.provider, &result.thread)
                .await?;
        }
        self.activator.touch(&context_id);
        Ok(result)
    }

    /// Like [`handle_message`](Self::handle_message), but failures are logged
    /// and reported to the user as a short message.
    pub async fn process_message(&self, msg: InboundMessage) -> Option<TurnResult> {
        let context_id = self.context_id(&msg);
        match self.handle_message(msg).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!(context = %context_id, error = %e, "Turn failed");
                deliver(self.sink.as_ref(), &context_id, e.user_message()).await;
                None
            }
        }
    }

    /// Consume inbound messages until the channel closes or shutdown fires.
    /// Each message runs on its own task so a slow turn never blocks others.
    pub async fn run_loop(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        mut shutdown_rx: Option<broadcast::Receiver<()>>,
    ) {
        info!("AgentRuntime started");

        loop {
            tokio::select! {
                _ = async {
                    if let Some(ref mut rx) = shutdown_rx {
                        let _ = rx.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {
                    info!("Shutdown signal received");
                    break;
                }
                msg = inbound_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            let task_id = format!("msg_{}", uuid::Uuid::new_v4());
                            debug!(task_id = %task_id, channel = %msg.channel, "Dispatching inbound message");
                            let runtime = self.clone();
                            tokio::spawn(async move {
                                runtime.process_message(msg).await;
                                debug!(task_id = %task_id, "Message task finished");
                            });
                        }
                        None => {
                            info!("Inbound channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.activator.scheduler().shutdown();
        info!("AgentRuntime stopped");
    }
}

/// Local path or http(s) URL to an attachment, typed by file extension.
pub async fn load_attachment(source: &str) -> Result<Attachment> {
    let is_url = source.starts_with("http://") || source.starts_with("https://");
    let path_part = if is_url {
        source.split(&['?', '#'][..]).next().unwrap_or(source)
    } else {
        source
    };
    let mime_type = mime_guess::from_path(path_part)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let name = Path::new(path_part)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string());

    if is_url {
        return Ok(Attachment::url(name, mime_type, source));
    }
    let data = tokio::fs::read(source)
        .await
        .map_err(|e| Error::Validation(format!("cannot read attachment {}: {}", source, e)))?;
    Ok(Attachment::inline(name, mime_type, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::{AssistantTurn, AttachmentSource, Role, ToolCall};
    use parley_storage::InMemoryHistoryStore;
    use serde_json::json;

    use crate::context::StaticComposer;
    use crate::sink::ChannelSink;
    use crate::testing::{FixedPriceTool, RecordingSink, ScriptedProvider};
    use crate::MessageBus;

    fn runtime_with(
        provider: Arc<ScriptedProvider>,
        sink: Arc<dyn OutputSink>,
    ) -> (AgentRuntime, Arc<InMemoryHistoryStore>) {
        let store = Arc::new(InMemoryHistoryStore::new());
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(FixedPriceTool));
        let runtime = AgentRuntime::with_composer(
            Config::default(),
            Arc::new(StaticComposer("be brief".to_string())),
            store.clone(),
            sink,
            registry,
            HashMap::from([("scripted".to_string(), provider as Arc<dyn Provider>)]),
            "scripted",
        )
        .unwrap();
        (runtime, store)
    }

    #[tokio::test]
    async fn test_price_question_end_to_end() {
        let call = ToolCall::new("call_1", "crypto_price", json!({"symbol": "btc"}));
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(AssistantTurn::with_tool_calls(None, vec![call])),
            Ok(AssistantTurn::text("BTC is at $64,000.")),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let (runtime, store) = runtime_with(provider.clone(), sink.clone());

        let msg = InboundMessage::cli("check the price of BTC");
        let result = runtime.handle_message(msg).await.unwrap();

        // classified and switched before the first request
        assert!(provider.request(0).1.contains(&"crypto_price".to_string()));
        assert_eq!(runtime.activator().active("cli:default").await.unwrap(), "price");

        let saved = store.load_thread("cli:default", "scripted").await.unwrap();
        let roles: Vec<Role> = saved.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(saved[3].tool_results()[0].content_value()["usd"], json!(64000.0));
        assert_eq!(result.final_text.as_deref(), Some("BTC is at $64,000."));

        let texts = sink.texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("Switched to 'price'"));
        assert_eq!(texts[1], "BTC is at $64,000.");
        assert!(runtime.activator().scheduler().remaining("cli:default").is_some());
    }

    #[tokio::test]
    async fn test_no_cooldown_when_capability_already_active() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let (runtime, _store) = runtime_with(provider, sink);

        runtime.activator().ensure_active("cli:default", "price").await.unwrap();
        runtime
            .handle_message(InboundMessage::cli("price of bitcoin"))
            .await
            .unwrap();
        runtime
            .handle_message(InboundMessage::cli("convert 100 usd to eur"))
            .await
            .unwrap();

        assert_eq!(runtime.activator().active("cli:default").await.unwrap(), "currency");
    }

    #[tokio::test]
    async fn test_ephemeral_turn_not_saved() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let (runtime, store) = runtime_with(provider, sink);

        let mut msg = InboundMessage::cli("hello");
        msg.ephemeral = true;
        runtime.handle_message(msg).await.unwrap();
        assert!(store.load_thread("cli:default", "scripted").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_history_keeps_capability() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let (runtime, store) = runtime_with(provider, sink);

        runtime.handle_message(InboundMessage::cli("hello")).await.unwrap();
        store.set_active_capability("cli:default", "price").await.unwrap();
        runtime.clear_history("cli:default").await.unwrap();

        assert!(store.load_thread("cli:default", "scripted").await.unwrap().is_empty());
        assert_eq!(
            store.get_active_capability("cli:default").await.unwrap().as_deref(),
            Some("price")
        );
    }

    #[tokio::test]
    async fn test_failure_reported_to_user() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(Error::ProviderContentBlocked(
            "policy".into(),
        ))]));
        let sink = Arc::new(RecordingSink::default());
        let (runtime, store) = runtime_with(provider, sink.clone());

        assert!(runtime.process_message(InboundMessage::cli("hello")).await.is_none());
        assert_eq!(
            sink.texts(),
            vec![Error::ProviderContentBlocked(String::new()).user_message().to_string()]
        );
        assert!(store.load_thread("cli:default", "scripted").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_media_file_becomes_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("chart.png");
        std::fs::write(&image, [0x89, 0x50, 0x4e, 0x47]).unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let (runtime, _) = runtime_with(provider.clone(), sink);

        let mut msg = InboundMessage::cli("what does this show");
        msg.media = vec![image.to_string_lossy().to_string()];
        runtime.handle_message(msg).await.unwrap();

        let (thread, _) = provider.request(0);
        let attachments = thread[1].attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "chart.png");
        assert_eq!(attachments[0].mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_load_attachment_url_and_missing_file() {
        let a = load_attachment("https://example.com/a/photo.jpg?size=large")
            .await
            .unwrap();
        assert_eq!(a.name, "photo.jpg");
        assert_eq!(a.mime_type, "image/jpeg");
        assert!(matches!(a.source, AttachmentSource::Url(_)));

        assert!(matches!(
            load_attachment("/definitely/not/here.png").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_run_loop_replies_and_stops() {
        let (mut frontend, backend) = MessageBus::new(8).split();
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(AssistantTurn::text("pong"))]));
        let sink = Arc::new(ChannelSink::new(backend.outbound_tx.clone()));
        let (runtime, _) = runtime_with(provider, sink);
        let runtime = Arc::new(runtime);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(runtime.clone().run_loop(backend.inbound_rx, Some(shutdown_rx)));

        frontend
            .inbound_tx
            .send(InboundMessage::cli("ping"))
            .await
            .unwrap();
        let reply = frontend.outbound_rx.recv().await.unwrap();
        assert_eq!(reply.context_id, "cli:default");
        assert_eq!(reply.content, "pong");

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
