pub mod activator;
pub mod bus;
pub mod context;
pub mod intent;
pub mod orchestrator;
pub mod runtime;
pub mod sink;

#[cfg(test)]
mod testing;

pub use activator::{Activation, CapabilityActivator};
pub use bus::{FrontendSide, MessageBus, RuntimeSide};
pub use context::{InstructionComposer, StaticComposer, WorkspaceComposer};
pub use intent::{IntentClassifier, PriorActivations, SuggestionGate};
pub use orchestrator::{ConversationOrchestrator, TurnResult, PROVIDER_KEY};
pub use runtime::{load_attachment, AgentRuntime};
pub use sink::ChannelSink;
