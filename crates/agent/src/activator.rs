use chrono::{DateTime, Utc};
use parley_core::config::CapabilitiesConfig;
use parley_core::sink::deliver;
use parley_core::types::CapabilityState;
use parley_core::{Error, HistoryStore, OutputSink, Result};
use parley_scheduler::{AutoReturnScheduler, SWITCHED_AT_KEY};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of [`CapabilityActivator::ensure_active`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub capability: String,
    pub previous: String,
    pub switched: bool,
}

/// Switches the active capability of a context and arms the auto-return timer.
pub struct CapabilityActivator {
    store: Arc<dyn HistoryStore>,
    scheduler: Arc<AutoReturnScheduler>,
    sink: Option<Arc<dyn OutputSink>>,
    capabilities: CapabilitiesConfig,
}

impl CapabilityActivator {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        scheduler: Arc<AutoReturnScheduler>,
        capabilities: CapabilitiesConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            sink: None,
            capabilities,
        }
    }

    /// Announce switches on this sink.
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn scheduler(&self) -> &Arc<AutoReturnScheduler> {
        &self.scheduler
    }

    pub fn default_capability(&self) -> &str {
        &self.capabilities.default
    }

    /// Active capability of a context. Missing or stale names read as the default.
    pub async fn active(&self, context_id: &str) -> Result<String> {
        let stored = self.store.get_active_capability(context_id).await?;
        Ok(match stored {
            Some(name) if self.capabilities.contains(&name) => name,
            Some(name) => {
                debug!(context = %context_id, capability = %name, "Stored capability no longer configured");
                self.capabilities.default.clone()
            }
            None => self.capabilities.default.clone(),
        })
    }

    pub async fn ensure_active(&self, context_id: &str, capability: &str) -> Result<Activation> {
        if !self.capabilities.contains(capability) {
            return Err(Error::Validation(format!(
                "unknown capability '{}'",
                capability
            )));
        }

        let _guard = self.scheduler.lock_context(context_id).await;
        let previous = self.active(context_id).await?;
        if previous == capability {
            return Ok(Activation {
                capability: capability.to_string(),
                previous,
                switched: false,
            });
        }

        self.store
            .set_active_capability(context_id, capability)
            .await?;
        if let Err(e) = self
            .store
            .set_key(context_id, SWITCHED_AT_KEY, &Utc::now().to_rfc3339())
            .await
        {
            warn!(context = %context_id, error = %e, "Failed to record capability switch time");
        }

        let notice = if capability == self.capabilities.default {
            self.scheduler.cancel(context_id);
            format!("Switched back to '{}'.", capability)
        } else {
            let timeout = self.capabilities.timeout_for(capability);
            self.scheduler
                .schedule(context_id, capability, Duration::from_secs(timeout));
            format!(
                "Switched to '{}'. Returning to '{}' after {}s without activity.",
                capability, self.capabilities.default, timeout
            )
        };

        info!(
            context = %context_id,
            from = %previous,
            to = %capability,
            "Capability activated"
        );
        if let Some(sink) = &self.sink {
            deliver(sink.as_ref(), context_id, &notice).await;
        }

        Ok(Activation {
            capability: capability.to_string(),
            previous,
            switched: true,
        })
    }

    /// Manual return to the default capability.
    pub async fn reset(&self, context_id: &str) -> Result<Activation> {
        let default = self.capabilities.default.clone();
        self.ensure_active(context_id, &default).await
    }

    pub async fn state(&self, context_id: &str) -> Result<CapabilityState> {
        let active = self.active(context_id).await?;
        let switched_at = self
            .store
            .get_key(context_id, SWITCHED_AT_KEY)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&Utc));
        let timeout_seconds = if active == self.capabilities.default {
            None
        } else {
            Some(self.capabilities.timeout_for(&active))
        };
        Ok(CapabilityState {
            active,
            switched_at,
            timeout_seconds,
        })
    }

    /// Restart the inactivity countdown after the context was used.
    /// Returns whether a timer was re-armed.
    pub fn touch(&self, context_id: &str) -> bool {
        let Some(capability) = self.scheduler.armed_capability(context_id) else {
            return false;
        };
        let timeout = self.capabilities.timeout_for(&capability);
        self.scheduler
            .schedule(context_id, &capability, Duration::from_secs(timeout));
        debug!(context = %context_id, capability = %capability, timeout, "Auto-return timer refreshed");
        true
    }

    /// Re-arm the timer for a context restored from storage, e.g. after a
    /// restart. A timeout that already elapsed returns to the default now.
    pub async fn resume(&self, context_id: &str) -> Result<()> {
        let state = self.state(context_id).await?;
        let Some(timeout) = state.timeout_seconds else {
            return Ok(());
        };
        if self.scheduler.remaining(context_id).is_some() {
            return Ok(());
        }

        let elapsed = state
            .switched_at
            .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
            .unwrap_or(0);
        if elapsed >= timeout {
            info!(context = %context_id, capability = %state.active, "Capability timed out while offline");
            self.reset(context_id).await?;
        } else {
            self.scheduler.schedule(
                context_id,
                &state.active,
                Duration::from_secs(timeout - elapsed),
            );
        }
        Ok(())
    }
}
