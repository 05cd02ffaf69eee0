use chrono::Utc;
use parley_core::sink::deliver;
use parley_core::{Error, HistoryStore, OutputSink, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Settings key holding the RFC 3339 time of the last capability switch.
pub const SWITCHED_AT_KEY: &str = "capability_switched_at";

struct Timer {
    capability: String,
    timeout: Duration,
    armed_at: Instant,
    generation: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    fn remaining(&self) -> Duration {
        (self.armed_at + self.timeout).saturating_duration_since(Instant::now())
    }
}

struct Shared {
    store: Arc<dyn HistoryStore>,
    sink: Option<Arc<dyn OutputSink>>,
    default_capability: String,
    timers: Mutex<HashMap<String, Timer>>,
    // Held across every read-then-write of a context's capability record.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Shared {
    fn timers(&self) -> MutexGuard<'_, HashMap<String, Timer>> {
        // A poisoned map still holds valid timers; keep going with it.
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn lock_context(&self, context_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(context_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// One-shot inactivity timers that return a context to the default
/// capability. At most one timer is armed per context.
pub struct AutoReturnScheduler {
    shared: Arc<Shared>,
    generation: AtomicU64,
}

impl AutoReturnScheduler {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        sink: Option<Arc<dyn OutputSink>>,
        default_capability: &str,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                sink,
                default_capability: default_capability.to_string(),
                timers: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn default_capability(&self) -> &str {
        &self.shared.default_capability
    }

    /// Exclusive access to the capability record of one context. Expiry takes
    /// the same lock, so a switch made under it never races an auto-return.
    pub async fn lock_context(&self, context_id: &str) -> OwnedMutexGuard<()> {
        self.shared.lock_context(context_id).await
    }

    /// Arm (or re-arm) the timer for `context_id`. Any previous timer is cancelled.
    pub fn schedule(&self, context_id: &str, capability: &str, timeout: Duration) {
        let mut timers = self.shared.timers();
        self.arm(&mut timers, context_id, capability, timeout);
        info!(
            context = %context_id,
            capability = %capability,
            timeout_secs = timeout.as_secs(),
            "Auto-return armed"
        );
    }

    /// Push the deadline of an armed timer out by `extra`.
    /// Returns the new remaining time.
    pub fn extend(&self, context_id: &str, extra: Duration) -> Result<Duration> {
        let mut timers = self.shared.timers();
        let (capability, remaining) = match timers.get(context_id) {
            Some(timer) => (timer.capability.clone(), timer.remaining()),
            None => {
                return Err(Error::NotFound(format!(
                    "no auto-return timer armed for {}",
                    context_id
                )))
            }
        };
        let timeout = remaining + extra;
        self.arm(&mut timers, context_id, &capability, timeout);
        debug!(context = %context_id, remaining_secs = timeout.as_secs(), "Auto-return extended");
        Ok(timeout)
    }

    /// Disarm the timer. Returns whether one was armed.
    pub fn cancel(&self, context_id: &str) -> bool {
        match self.shared.timers().remove(context_id) {
            Some(timer) => {
                timer.handle.abort();
                debug!(context = %context_id, capability = %timer.capability, "Auto-return cancelled");
                true
            }
            None => false,
        }
    }

    /// Time left before the context returns to the default, if armed.
    pub fn remaining(&self, context_id: &str) -> Option<Duration> {
        self.shared.timers().get(context_id).map(Timer::remaining)
    }

    /// Capability the context is armed to return from, if any.
    pub fn armed_capability(&self, context_id: &str) -> Option<String> {
        self.shared
            .timers()
            .get(context_id)
            .map(|t| t.capability.clone())
    }

    pub fn armed_count(&self) -> usize {
        self.shared.timers().len()
    }

    /// Abort every pending timer.
    pub fn shutdown(&self) {
        let mut timers = self.shared.timers();
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        if count > 0 {
            info!(count, "Auto-return scheduler stopped");
        }
    }

    fn arm(
        &self,
        timers: &mut HashMap<String, Timer>,
        context_id: &str,
        capability: &str,
        timeout: Duration,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let shared = self.shared.clone();
        let ctx = context_id.to_string();
        let armed_at = Instant::now();
        let deadline = armed_at + timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            expire(shared, ctx, generation).await;
        });
        let timer = Timer {
            capability: capability.to_string(),
            timeout,
            armed_at,
            generation,
            handle,
        };
        if let Some(previous) = timers.insert(context_id.to_string(), timer) {
            previous.handle.abort();
        }
    }
}

impl Drop for AutoReturnScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Timer body. Runs under the context lock; removing the entry is the
/// linearization point: a cancel or re-arm that got there first wins and
/// this expiry does nothing.
async fn expire(shared: Arc<Shared>, context_id: String, generation: u64) {
    let _guard = shared.lock_context(&context_id).await;
    let capability = {
        let mut timers = shared.timers();
        match timers.get(&context_id) {
            Some(t) if t.generation == generation => {}
            _ => return,
        }
        match timers.remove(&context_id) {
            Some(t) => t.capability,
            None => return,
        }
    };

    let active = match shared.store.get_active_capability(&context_id).await {
        Ok(active) => active,
        Err(e) => {
            warn!(context = %context_id, error = %e, "Auto-return could not read the active capability");
            return;
        }
    };
    if active.as_deref() != Some(capability.as_str()) {
        debug!(
            context = %context_id,
            armed = %capability,
            active = ?active,
            "Capability changed since arming, skipping auto-return"
        );
        return;
    }

    if shared.timers().contains_key(&context_id) {
        debug!(context = %context_id, "Timer re-armed during auto-return, skipping");
        return;
    }

    let default = &shared.default_capability;
    if let Err(e) = shared.store.set_active_capability(&context_id, default).await {
        warn!(context = %context_id, error = %e, "Auto-return failed to reset the capability");
        return;
    }
    if let Err(e) = shared
        .store
        .set_key(&context_id, SWITCHED_AT_KEY, &Utc::now().to_rfc3339())
        .await
    {
        warn!(context = %context_id, error = %e, "Failed to record capability switch time");
    }
    info!(context = %context_id, from = %capability, to = %default, "Auto-returned to default capability");

    if let Some(sink) = &shared.sink {
        let notice = format!(
            "No activity in '{}' for a while, switched back to '{}'.",
            capability, default
        );
        deliver(sink.as_ref(), &context_id, &notice).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_storage::InMemoryHistoryStore;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl OutputSink for RecordingSink {
        async fn send_text(&self, context_id: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((context_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn scheduler() -> (AutoReturnScheduler, Arc<InMemoryHistoryStore>, Arc<RecordingSink>) {
        let store = Arc::new(InMemoryHistoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler =
            AutoReturnScheduler::new(store.clone(), Some(sink.clone() as Arc<dyn OutputSink>), "chat");
        (scheduler, store, sink)
    }

    /// Let spawned timer tasks run to completion.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_schedule_keeps_one_timer() {
        let (scheduler, _store, _sink) = scheduler();
        scheduler.schedule("cli:a", "price", Duration::from_secs(60));
        scheduler.schedule("cli:a", "currency", Duration::from_secs(30));
        assert_eq!(scheduler.armed_count(), 1);
        assert_eq!(scheduler.armed_capability("cli:a").as_deref(), Some("currency"));
        assert_eq!(scheduler.remaining("cli:a"), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_adds_to_remaining() {
        let (scheduler, _store, _sink) = scheduler();
        scheduler.schedule("cli:a", "price", Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(10)).await;
        let remaining = scheduler.extend("cli:a", Duration::from_secs(30)).unwrap();
        assert_eq!(remaining, Duration::from_secs(80));
        assert_eq!(scheduler.remaining("cli:a"), Some(Duration::from_secs(80)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_unarmed_is_not_found() {
        let (scheduler, _store, _sink) = scheduler();
        assert!(matches!(
            scheduler.extend("cli:a", Duration::from_secs(5)),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_resets_capability_and_notifies() {
        let (scheduler, store, sink) = scheduler();
        store.set_active_capability("cli:a", "price").await.unwrap();
        scheduler.schedule("cli:a", "price", Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(store.get_active_capability("cli:a").await.unwrap().as_deref(), Some("price"));

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(store.get_active_capability("cli:a").await.unwrap().as_deref(), Some("chat"));
        assert!(store.get_key("cli:a", SWITCHED_AT_KEY).await.unwrap().is_some());
        assert_eq!(scheduler.armed_count(), 0);
        assert_eq!(scheduler.remaining("cli:a"), None);

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("'chat'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_skips_when_capability_changed() {
        let (scheduler, store, sink) = scheduler();
        store.set_active_capability("cli:a", "currency").await.unwrap();
        scheduler.schedule("cli:a", "price", Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(store.get_active_capability("cli:a").await.unwrap().as_deref(), Some("currency"));
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let (scheduler, store, _sink) = scheduler();
        store.set_active_capability("cli:a", "price").await.unwrap();
        scheduler.schedule("cli:a", "price", Duration::from_secs(10));
        assert!(scheduler.cancel("cli:a"));
        assert!(!scheduler.cancel("cli:a"));

        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(store.get_active_capability("cli:a").await.unwrap().as_deref(), Some("price"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let (scheduler, store, _sink) = scheduler();
        for ctx in ["cli:a", "cli:b", "cli:c"] {
            store.set_active_capability(ctx, "price").await.unwrap();
            scheduler.schedule(ctx, "price", Duration::from_secs(10));
        }
        assert_eq!(scheduler.armed_count(), 3);
        scheduler.shutdown();
        assert_eq!(scheduler.armed_count(), 0);

        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(store.get_active_capability("cli:b").await.unwrap().as_deref(), Some("price"));
    }
}
