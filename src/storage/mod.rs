//! Persistence gates
//!
//! The core does not own storage. These narrow traits are the whole
//! contract with the persistence collaborator: provider rows that
//! round-trip their descriptor and health summary, aggregate statistics
//! rows, and per-request telemetry records. An in-memory implementation
//! backs tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::providers::ProviderKind;
use crate::core::registry::{ProviderStatus, RegistryStats};
use crate::core::types::ProviderFeature;

/// Provider row as the persistence collaborator stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRow {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub capabilities: Vec<ProviderFeature>,
    pub status: ProviderStatus,
    /// Health score in [0, 1]
    pub health_score: f64,
    pub last_probe: Option<DateTime<Utc>>,
    pub avg_latency_ms: f64,
}

/// Per-request telemetry record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogRecord {
    pub request_id: String,
    pub user_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Provider-row persistence gate
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn get_provider(&self, name: &str) -> Result<Option<ProviderRow>>;
    async fn list_providers(&self) -> Result<Vec<ProviderRow>>;
    async fn update_provider(&self, row: ProviderRow) -> Result<()>;
}

/// Aggregate-statistics persistence gate
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn record_stats(&self, stats: &RegistryStats) -> Result<()>;
}

/// Per-request telemetry gate
#[async_trait]
pub trait RequestLogSink: Send + Sync {
    async fn record_request(&self, record: RequestLogRecord) -> Result<()>;
}

/// Push a registry snapshot through the storage gates: one aggregate
/// statistics row plus an updated row per provider.
pub async fn persist_registry<S>(registry: &crate::core::registry::ProviderRegistry, store: &S)
where
    S: StatsSink + ProviderStore,
{
    let _ = store.record_stats(&registry.stats()).await;

    for name in registry.list() {
        let (Some(state), Some(descriptor)) =
            (registry.state_of(&name), registry.descriptor_of(&name))
        else {
            continue;
        };
        let health_score = match state.health {
            crate::core::registry::HealthState::Healthy => 1.0,
            crate::core::registry::HealthState::Unknown => 0.5,
            crate::core::registry::HealthState::Unhealthy => 0.0,
        };
        let row = ProviderRow {
            name,
            kind: descriptor.kind,
            base_url: descriptor.base_url,
            capabilities: descriptor.capabilities,
            status: state.status,
            health_score,
            last_probe: state.last_probe,
            avg_latency_ms: state.avg_latency_ms,
        };
        let _ = store.update_provider(row).await;
    }
}

/// In-memory implementation of all three gates
#[derive(Default)]
pub struct MemoryStore {
    providers: Mutex<HashMap<String, ProviderRow>>,
    stats: Mutex<Vec<RegistryStats>>,
    requests: Mutex<Vec<RequestLogRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_log(&self) -> Vec<RequestLogRecord> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn get_provider(&self, name: &str) -> Result<Option<ProviderRow>> {
        Ok(self.providers.lock().get(name).cloned())
    }

    async fn list_providers(&self) -> Result<Vec<ProviderRow>> {
        let mut rows: Vec<_> = self.providers.lock().values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn update_provider(&self, row: ProviderRow) -> Result<()> {
        self.providers.lock().insert(row.name.clone(), row);
        Ok(())
    }
}

#[async_trait]
impl StatsSink for MemoryStore {
    async fn record_stats(&self, stats: &RegistryStats) -> Result<()> {
        self.stats.lock().push(stats.clone());
        Ok(())
    }
}

#[async_trait]
impl RequestLogSink for MemoryStore {
    async fn record_request(&self, record: RequestLogRecord) -> Result<()> {
        self.requests.lock().push(record);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("providers", &self.providers.lock().len())
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provider_rows_round_trip() {
        let store = MemoryStore::new();
        let row = ProviderRow {
            name: "openai".to_string(),
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            capabilities: vec![ProviderFeature::Streaming, ProviderFeature::Tools],
            status: ProviderStatus::Active,
            health_score: 1.0,
            last_probe: Some(Utc::now()),
            avg_latency_ms: 240.0,
        };

        store.update_provider(row.clone()).await.unwrap();
        let loaded = store.get_provider("openai").await.unwrap().unwrap();
        assert_eq!(loaded.name, row.name);
        assert_eq!(loaded.base_url, row.base_url);
        assert_eq!(loaded.capabilities, row.capabilities);
        assert_eq!(loaded.status, row.status);
        assert_eq!(loaded.avg_latency_ms, row.avg_latency_ms);
    }

    #[tokio::test]
    async fn registry_snapshot_persists_rows() {
        use crate::core::providers::{OpenAiCompatClient, ProviderDescriptor};
        use crate::core::registry::ProviderRegistry;
        use std::sync::Arc;

        let registry = ProviderRegistry::new();
        let client = OpenAiCompatClient::new(
            ProviderDescriptor::new("p", ProviderKind::Compatible, "http://localhost:1"),
            None,
        )
        .unwrap();
        registry.register(Arc::new(client)).unwrap();

        let store = MemoryStore::new();
        persist_registry(&registry, &store).await;

        let rows = store.list_providers().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "p");
        assert_eq!(rows[0].status, ProviderStatus::Active);
        assert_eq!(rows[0].health_score, 0.5);
    }

    #[tokio::test]
    async fn request_records_accumulate() {
        let store = MemoryStore::new();
        store
            .record_request(RequestLogRecord {
                request_id: "r1".to_string(),
                user_id: Some("u1".to_string()),
                model: "gpt-4o".to_string(),
                provider: "openai".to_string(),
                prompt_tokens: 12,
                completion_tokens: 30,
                latency_ms: 800,
                success: true,
                error: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.request_log().len(), 1);
    }
}
