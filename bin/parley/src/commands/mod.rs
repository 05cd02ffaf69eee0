pub mod agent;
pub mod capability;
pub mod classify;
pub mod history;
pub mod model;
pub mod onboard;
pub mod status;

use parley_agent::CapabilityActivator;
use parley_core::{Config, HistoryStore, InboundMessage, Paths};
use parley_scheduler::AutoReturnScheduler;
use parley_storage::SqliteHistoryStore;
use std::sync::Arc;

pub(crate) fn open_store(paths: &Paths) -> anyhow::Result<Arc<dyn HistoryStore>> {
    paths.ensure_dirs()?;
    Ok(Arc::new(SqliteHistoryStore::open(&paths.history_db())?))
}

/// Activator for one-off commands. Timers armed here die with the process;
/// the next `agent` run re-arms them from the stored switch time.
pub(crate) fn activator(config: &Config, store: Arc<dyn HistoryStore>) -> CapabilityActivator {
    let scheduler = Arc::new(AutoReturnScheduler::new(
        store.clone(),
        None,
        &config.capabilities.default,
    ));
    CapabilityActivator::new(store, scheduler, config.capabilities.clone())
}

/// Inbound message for a `channel:id` session. Sender and chat share the id
/// so the context id is the session under either context scope.
pub(crate) fn inbound(session: &str, content: &str) -> InboundMessage {
    let (channel, id) = session.split_once(':').unwrap_or(("cli", session));
    let mut msg = InboundMessage::cli(content);
    msg.channel = channel.to_string();
    msg.chat_id = id.to_string();
    msg.sender_id = id.to_string();
    msg
}
