//! Background health monitor
//!
//! Probes every registered provider on a fixed interval and feeds the
//! outcomes into the registry, which derives status transitions. A probe
//! that fails is not retried within the same tick; it counts toward the
//! consecutive-error threshold like any other failure.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::registry::ProviderRegistry;
use crate::core::types::RequestContext;

/// Default probe interval: five minutes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Periodic health prober
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    interval: Duration,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ProviderRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle that stops the monitor loop.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one probe round immediately.
    pub async fn tick(&self) {
        let ctx = RequestContext::new();
        let results = self.registry.health_check_all(&ctx).await;
        for (provider, error) in &results {
            match error {
                None => debug!(provider = %provider, "probe ok"),
                Some(message) => warn!(provider = %provider, error = %message, "probe failed"),
            }
        }
    }

    /// Run until cancelled, probing on the configured interval.
    pub async fn run(self) {
        info!(interval_s = self.interval.as_secs(), "health monitor started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately so providers leave `unknown`
        // without waiting a full interval.
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("health monitor stopped");
                    return;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    /// Spawn the monitor loop as a background task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .finish()
    }
}
