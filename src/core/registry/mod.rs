//! Provider registry
//!
//! The registry is the only cross-component mutable structure on the
//! request path. It maps provider names to their client and state under a
//! reader-writer exclusion: readers are non-blocking, writers exclude
//! readers, and updates for a given provider are linearizable.

pub mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::error::{GatewayError, Result};
use crate::core::providers::ProviderClient;
use crate::core::types::RequestContext;

pub use state::{ERROR_THRESHOLD, HealthState, ProviderState, ProviderStatus};

struct ProviderEntry {
    client: Arc<dyn ProviderClient>,
    state: ProviderState,
}

/// Registry of provider clients and their state
#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, ProviderEntry>>,
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub providers: usize,
    pub active: usize,
    pub healthy: usize,
    pub total_successes: u64,
    pub total_errors: u64,
    pub avg_latency_ms: f64,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Fails on duplicate names.
    pub fn register(&self, client: Arc<dyn ProviderClient>) -> Result<()> {
        let name = client.name().to_string();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(GatewayError::configuration(format!(
                "provider '{name}' is already registered"
            )));
        }
        info!(provider = %name, kind = %client.kind(), "provider registered");
        entries.insert(
            name,
            ProviderEntry {
                client,
                state: ProviderState::new(),
            },
        );
        Ok(())
    }

    /// Remove a provider.
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.entries
            .write()
            .remove(name)
            .map(|_| info!(provider = %name, "provider unregistered"))
            .ok_or_else(|| {
                GatewayError::configuration(format!("provider '{name}' is not registered"))
            })
    }

    /// Get a provider by name. Fails if not found or not active.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderClient>> {
        let entries = self.entries.read();
        let entry = entries.get(name).ok_or_else(|| {
            GatewayError::configuration(format!("provider '{name}' is not registered"))
        })?;
        if entry.state.status != ProviderStatus::Active {
            return Err(GatewayError::unhealthy_provider(name));
        }
        Ok(entry.client.clone())
    }

    /// First provider that is eligible (active and not derived-unhealthy).
    pub fn get_first_healthy(&self) -> Option<Arc<dyn ProviderClient>> {
        let entries = self.entries.read();
        let mut eligible: Vec<_> = entries
            .values()
            .filter(|e| e.state.is_eligible())
            .collect();
        // Name order keeps selection deterministic across identical maps.
        eligible.sort_by(|a, b| a.client.name().cmp(b.client.name()));
        eligible.first().map(|e| e.client.clone())
    }

    /// The named provider when eligible, otherwise the first eligible one.
    pub fn get_or_first(&self, preferred: &str) -> Option<Arc<dyn ProviderClient>> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(preferred) {
                if entry.state.is_eligible() {
                    return Some(entry.client.clone());
                }
            }
        }
        self.get_first_healthy()
    }

    /// All registered provider names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of providers with active status.
    pub fn list_active(&self) -> Vec<String> {
        let entries = self.entries.read();
        let mut names: Vec<_> = entries
            .iter()
            .filter(|(_, e)| e.state.status == ProviderStatus::Active)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Clients of every eligible provider, in name order.
    pub fn eligible_providers(&self) -> Vec<Arc<dyn ProviderClient>> {
        let entries = self.entries.read();
        let mut eligible: Vec<_> = entries
            .values()
            .filter(|e| e.state.is_eligible())
            .map(|e| e.client.clone())
            .collect();
        eligible.sort_by(|a, b| a.name().cmp(b.name()));
        eligible
    }

    /// Explicitly set a provider's status, overriding derived health.
    pub fn set_status(&self, name: &str, status: ProviderStatus) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(name).ok_or_else(|| {
            GatewayError::configuration(format!("provider '{name}' is not registered"))
        })?;
        info!(provider = %name, ?status, "provider status set");
        entry.state.status = status;
        Ok(())
    }

    /// Record a successful call with its observed latency.
    pub fn record_success(&self, name: &str, latency: Duration) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.state.record_success(latency.as_secs_f64() * 1000.0);
        }
    }

    /// Record a failed call.
    pub fn record_error(&self, name: &str) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(name) {
            entry.state.record_error();
            if entry.state.health == HealthState::Unhealthy {
                warn!(provider = %name, "provider derived unhealthy");
            }
        }
    }

    /// Probe every registered provider in parallel and record results.
    ///
    /// Returns each provider's probe error message, `None` on success.
    pub async fn health_check_all(
        &self,
        ctx: &RequestContext,
    ) -> HashMap<String, Option<String>> {
        // Snapshot clients outside the lock so probes never hold it.
        let clients: Vec<(String, Arc<dyn ProviderClient>)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .map(|(name, e)| (name.clone(), e.client.clone()))
                .collect()
        };

        let probes = clients.into_iter().map(|(name, client)| {
            let ctx = ctx.child();
            async move {
                let outcome = client.health_probe(&ctx).await;
                (name, outcome.err().map(|e| e.to_string()))
            }
        });
        let outcomes = futures::future::join_all(probes).await;

        let mut entries = self.entries.write();
        for (name, error) in &outcomes {
            if let Some(entry) = entries.get_mut(name) {
                entry.state.record_probe(error.is_none());
            }
        }
        outcomes.into_iter().collect()
    }

    /// Snapshot of one provider's state.
    pub fn state_of(&self, name: &str) -> Option<ProviderState> {
        self.entries.read().get(name).map(|e| e.state.clone())
    }

    /// Descriptor of one registered provider.
    pub fn descriptor_of(&self, name: &str) -> Option<crate::core::providers::ProviderDescriptor> {
        self.entries
            .read()
            .get(name)
            .map(|e| e.client.descriptor().clone())
    }

    /// Aggregate statistics snapshot.
    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.read();
        let providers = entries.len();
        let mut active = 0;
        let mut healthy = 0;
        let mut total_successes = 0;
        let mut total_errors = 0;
        let mut latency_sum = 0.0;
        let mut latency_count = 0usize;

        for entry in entries.values() {
            if entry.state.status == ProviderStatus::Active {
                active += 1;
            }
            if entry.state.health == HealthState::Healthy {
                healthy += 1;
            }
            total_successes += entry.state.success_count;
            total_errors += entry.state.error_count;
            if entry.state.success_count > 0 {
                latency_sum += entry.state.avg_latency_ms;
                latency_count += 1;
            }
        }

        RegistryStats {
            providers,
            active,
            healthy,
            total_successes,
            total_errors,
            avg_latency_ms: if latency_count > 0 {
                latency_sum / latency_count as f64
            } else {
                0.0
            },
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::{ProviderDescriptor, ProviderKind};
    use crate::core::types::{ChatRequest, ChatResponse, ModelInfo};

    #[derive(Debug)]
    struct NullProvider {
        descriptor: ProviderDescriptor,
    }

    impl NullProvider {
        fn named(name: &str) -> Arc<dyn ProviderClient> {
            Arc::new(Self {
                descriptor: ProviderDescriptor::new(
                    name,
                    ProviderKind::Compatible,
                    "http://localhost:0",
                ),
            })
        }
    }

    #[async_trait::async_trait]
    impl ProviderClient for NullProvider {
        fn name(&self) -> &str {
            &self.descriptor.name
        }

        fn kind(&self) -> ProviderKind {
            self.descriptor.kind
        }

        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        async fn chat_completion(
            &self,
            _request: ChatRequest,
            _ctx: &RequestContext,
        ) -> Result<ChatResponse> {
            Ok(ChatResponse::assistant("null", "ok"))
        }

        async fn stream(
            &self,
            _request: ChatRequest,
            _sink: crate::core::providers::ChunkSink,
            _ctx: &RequestContext,
        ) -> Result<()> {
            Ok(())
        }

        async fn health_probe(&self, _ctx: &RequestContext) -> Result<()> {
            Ok(())
        }

        async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ProviderRegistry::new();
        registry.register(NullProvider::named("a")).unwrap();
        assert!(registry.register(NullProvider::named("a")).is_err());
    }

    #[test]
    fn get_fails_for_inactive_provider() {
        let registry = ProviderRegistry::new();
        registry.register(NullProvider::named("a")).unwrap();
        registry
            .set_status("a", ProviderStatus::Maintenance)
            .unwrap();
        assert!(matches!(
            registry.get("a"),
            Err(GatewayError::UnhealthyProvider { .. })
        ));
    }

    #[test]
    fn unhealthy_provider_not_first_healthy() {
        let registry = ProviderRegistry::new();
        registry.register(NullProvider::named("a")).unwrap();
        registry.register(NullProvider::named("b")).unwrap();

        for _ in 0..ERROR_THRESHOLD {
            registry.record_error("a");
        }
        let first = registry.get_first_healthy().unwrap();
        assert_eq!(first.name(), "b");
    }

    #[test]
    fn get_or_first_prefers_named_when_eligible() {
        let registry = ProviderRegistry::new();
        registry.register(NullProvider::named("a")).unwrap();
        registry.register(NullProvider::named("b")).unwrap();
        assert_eq!(registry.get_or_first("b").unwrap().name(), "b");
        assert_eq!(registry.get_or_first("missing").unwrap().name(), "a");
    }

    #[test]
    fn record_success_updates_state_consistently() {
        let registry = ProviderRegistry::new();
        registry.register(NullProvider::named("a")).unwrap();

        let before = registry.state_of("a").unwrap();
        registry.record_success("a", Duration::from_millis(80));
        let after = registry.state_of("a").unwrap();

        assert_eq!(after.success_count, before.success_count + 1);
        assert_eq!(after.avg_latency_ms, 80.0);
    }

    #[tokio::test]
    async fn health_check_all_marks_probed_providers_healthy() {
        let registry = ProviderRegistry::new();
        registry.register(NullProvider::named("a")).unwrap();
        let ctx = RequestContext::new();

        let results = registry.health_check_all(&ctx).await;
        assert_eq!(results.len(), 1);
        assert!(results["a"].is_none());
        assert_eq!(
            registry.state_of("a").unwrap().health,
            HealthState::Healthy
        );
    }

    #[test]
    fn listings_track_status() {
        let registry = ProviderRegistry::new();
        registry.register(NullProvider::named("a")).unwrap();
        registry.register(NullProvider::named("b")).unwrap();
        registry.set_status("b", ProviderStatus::Inactive).unwrap();

        assert_eq!(registry.list(), vec!["a", "b"]);
        assert_eq!(registry.list_active(), vec!["a"]);

        registry.unregister("b").unwrap();
        assert_eq!(registry.list(), vec!["a"]);
        assert!(registry.unregister("b").is_err());
    }

    #[test]
    fn stats_aggregates_counters() {
        let registry = ProviderRegistry::new();
        registry.register(NullProvider::named("a")).unwrap();
        registry.record_success("a", Duration::from_millis(100));
        registry.record_error("a");

        let stats = registry.stats();
        assert_eq!(stats.providers, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_errors, 1);
    }
}
