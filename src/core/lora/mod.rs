//! LoRA adapter manager
//!
//! Tracks adapter metadata and a bounded pool of loaded adapters. The pool
//! enforces two caps, loaded count and total memory, with least-recently-
//! used eviction of idle entries. A loaded adapter referenced by a caller
//! is pinned and never evicted until released. Only metadata and an opaque
//! runtime handle are managed here; weights never pass through the
//! gateway.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::analyzer::TaskType;
use crate::core::error::{GatewayError, Result};

/// LoRA adapter descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraAdapter {
    /// Stable adapter id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Base model this adapter applies to
    pub base_model: String,
    /// Task the adapter specializes
    pub task: TaskType,
    /// Opaque resource locator
    pub locator: String,
    /// Adapter size in bytes, counted against the pool memory cap
    pub size_bytes: u64,
    pub metadata: HashMap<String, String>,
    pub registered_at: DateTime<Utc>,
}

impl LoraAdapter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        base_model: impl Into<String>,
        task: TaskType,
        locator: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_model: base_model.into(),
            task,
            locator: locator.into(),
            size_bytes,
            metadata: HashMap::new(),
            registered_at: Utc::now(),
        }
    }
}

/// A loaded adapter with its opaque runtime handle
///
/// Callers hold this behind an `Arc`; the pool treats an entry with
/// outstanding references as pinned.
#[derive(Debug)]
pub struct LoadedAdapter {
    pub adapter: LoraAdapter,
    pub loaded_at: DateTime<Utc>,
    /// Opaque handle the serving runtime hands back at load time
    pub runtime_handle: u64,
}

/// Usage bookkeeping kept in the registry
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdapterUsage {
    pub use_count: u64,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub max_loaded: usize,
    pub max_memory_bytes: u64,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_loaded: 4,
            max_memory_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

struct PoolEntry {
    loaded: Arc<LoadedAdapter>,
    last_used: DateTime<Utc>,
}

struct ManagerInner {
    registry: HashMap<String, (LoraAdapter, AdapterUsage)>,
    pool: HashMap<String, PoolEntry>,
    pool_bytes: u64,
    next_handle: u64,
}

/// Adapter registry plus bounded pool
pub struct LoraManager {
    limits: PoolLimits,
    inner: Mutex<ManagerInner>,
}

impl LoraManager {
    pub fn new(limits: PoolLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(ManagerInner {
                registry: HashMap::new(),
                pool: HashMap::new(),
                pool_bytes: 0,
                next_handle: 1,
            }),
        }
    }

    /// Register an adapter. Fails on duplicate ids.
    pub fn register(&self, adapter: LoraAdapter) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.registry.contains_key(&adapter.id) {
            return Err(GatewayError::configuration(format!(
                "adapter '{}' is already registered",
                adapter.id
            )));
        }
        info!(adapter = %adapter.id, base_model = %adapter.base_model, "adapter registered");
        inner
            .registry
            .insert(adapter.id.clone(), (adapter, AdapterUsage::default()));
        Ok(())
    }

    /// Remove an adapter from the registry (and the pool when idle there).
    pub fn unregister(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.registry.remove(id).is_none() {
            return Err(GatewayError::configuration(format!(
                "adapter '{id}' is not registered"
            )));
        }
        if let Some(entry) = inner.pool.get(id) {
            if Arc::strong_count(&entry.loaded) > 1 {
                return Err(GatewayError::configuration(format!(
                    "adapter '{id}' is still in use"
                )));
            }
            let size = entry.loaded.adapter.size_bytes;
            inner.pool.remove(id);
            inner.pool_bytes -= size;
        }
        Ok(())
    }

    /// Load an adapter, evicting idle LRU entries if a cap requires it.
    pub fn load(&self, id: &str) -> Result<Arc<LoadedAdapter>> {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.pool.get_mut(id) {
            entry.last_used = Utc::now();
            let loaded = entry.loaded.clone();
            if let Some((_, usage)) = inner.registry.get_mut(id) {
                usage.use_count += 1;
                usage.last_used = Some(Utc::now());
            }
            return Ok(loaded);
        }

        let adapter = inner
            .registry
            .get(id)
            .map(|(a, _)| a.clone())
            .ok_or_else(|| {
                GatewayError::configuration(format!("adapter '{id}' is not registered"))
            })?;
        if adapter.size_bytes > self.limits.max_memory_bytes {
            return Err(GatewayError::configuration(format!(
                "adapter '{id}' exceeds the pool memory cap"
            )));
        }

        // Evict idle LRU entries until both caps admit the new adapter.
        while inner.pool.len() >= self.limits.max_loaded
            || inner.pool_bytes + adapter.size_bytes > self.limits.max_memory_bytes
        {
            let victim = inner
                .pool
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.loaded) == 1)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(victim_id, _)| victim_id.clone());
            match victim {
                Some(victim_id) => {
                    let entry = inner.pool.remove(&victim_id).expect("victim exists");
                    inner.pool_bytes -= entry.loaded.adapter.size_bytes;
                    debug!(adapter = %victim_id, "evicted idle adapter");
                }
                // Every resident adapter is pinned; admission must not
                // drop one, so the load fails instead.
                None => {
                    return Err(GatewayError::configuration(format!(
                        "cannot load adapter '{id}': pool full of in-use adapters"
                    )));
                }
            }
        }

        let handle = inner.next_handle;
        inner.next_handle += 1;
        let loaded = Arc::new(LoadedAdapter {
            adapter: adapter.clone(),
            loaded_at: Utc::now(),
            runtime_handle: handle,
        });
        inner.pool_bytes += adapter.size_bytes;
        inner.pool.insert(
            id.to_string(),
            PoolEntry {
                loaded: loaded.clone(),
                last_used: Utc::now(),
            },
        );
        if let Some((_, usage)) = inner.registry.get_mut(id) {
            usage.use_count += 1;
            usage.last_used = Some(Utc::now());
        }
        info!(adapter = %id, size_bytes = adapter.size_bytes, "adapter loaded");
        Ok(loaded)
    }

    /// Release an adapter's pool slot and memory.
    pub fn unload(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.pool.get(id).ok_or_else(|| {
            GatewayError::configuration(format!("adapter '{id}' is not loaded"))
        })?;
        if Arc::strong_count(&entry.loaded) > 1 {
            return Err(GatewayError::configuration(format!(
                "adapter '{id}' is still in use"
            )));
        }
        let size = entry.loaded.adapter.size_bytes;
        inner.pool.remove(id);
        inner.pool_bytes -= size;
        info!(adapter = %id, "adapter unloaded");
        Ok(())
    }

    /// Pick and load the best adapter for a task and base model: filter by
    /// task, then base model, then the highest use count wins.
    pub fn auto_select(
        &self,
        task: TaskType,
        base_model: &str,
    ) -> Result<Option<Arc<LoadedAdapter>>> {
        let best = {
            let inner = self.inner.lock();
            inner
                .registry
                .values()
                .filter(|(a, _)| a.task == task)
                .filter(|(a, _)| a.base_model == base_model)
                .max_by_key(|(_, usage)| usage.use_count)
                .map(|(a, _)| a.id.clone())
        };
        match best {
            Some(id) => self.load(&id).map(Some),
            None => Ok(None),
        }
    }

    /// (loaded count, loaded bytes) snapshot.
    pub fn pool_usage(&self) -> (usize, u64) {
        let inner = self.inner.lock();
        (inner.pool.len(), inner.pool_bytes)
    }

    pub fn usage_of(&self, id: &str) -> Option<AdapterUsage> {
        self.inner
            .lock()
            .registry
            .get(id)
            .map(|(_, usage)| usage.clone())
    }
}

impl std::fmt::Debug for LoraManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (count, bytes) = self.pool_usage();
        f.debug_struct("LoraManager")
            .field("loaded", &count)
            .field("loaded_bytes", &bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_loaded: usize, max_memory_bytes: u64) -> LoraManager {
        LoraManager::new(PoolLimits {
            max_loaded,
            max_memory_bytes,
        })
    }

    fn adapter(id: &str, task: TaskType, base: &str, size: u64) -> LoraAdapter {
        LoraAdapter::new(id, id, base, task, format!("s3://adapters/{id}"), size)
    }

    #[test]
    fn caps_hold_under_load() {
        let mgr = manager(2, 1000);
        for i in 0..4 {
            mgr.register(adapter(
                &format!("a{i}"),
                TaskType::Coding,
                "base",
                400,
            ))
            .unwrap();
        }

        for i in 0..4 {
            mgr.load(&format!("a{i}")).unwrap();
            let (count, bytes) = mgr.pool_usage();
            assert!(count <= 2);
            assert!(bytes <= 1000);
        }
    }

    #[test]
    fn lru_eviction_targets_least_recently_used() {
        let mgr = manager(2, 10_000);
        for id in ["a", "b", "c"] {
            mgr.register(adapter(id, TaskType::Coding, "base", 10)).unwrap();
        }

        mgr.load("a").unwrap();
        mgr.load("b").unwrap();
        // Touch "a" so "b" becomes the LRU victim.
        mgr.load("a").unwrap();
        mgr.load("c").unwrap();

        assert!(mgr.unload("b").is_err(), "b should have been evicted");
        assert!(mgr.unload("a").is_ok());
    }

    #[test]
    fn pinned_adapters_are_never_evicted() {
        let mgr = manager(1, 10_000);
        mgr.register(adapter("pinned", TaskType::Coding, "base", 10))
            .unwrap();
        mgr.register(adapter("other", TaskType::Coding, "base", 10))
            .unwrap();

        let held = mgr.load("pinned").unwrap();
        let err = mgr.load("other").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));

        drop(held);
        assert!(mgr.load("other").is_ok());
    }

    #[test]
    fn cached_load_updates_usage() {
        let mgr = manager(2, 1000);
        mgr.register(adapter("a", TaskType::Coding, "base", 10)).unwrap();
        mgr.load("a").unwrap();
        mgr.load("a").unwrap();
        assert_eq!(mgr.usage_of("a").unwrap().use_count, 2);
        assert_eq!(mgr.pool_usage().0, 1);
    }

    #[test]
    fn auto_select_filters_by_task_and_base_model() {
        let mgr = manager(4, 10_000);
        mgr.register(adapter("code-a", TaskType::Coding, "llama", 10))
            .unwrap();
        mgr.register(adapter("code-b", TaskType::Coding, "llama", 10))
            .unwrap();
        mgr.register(adapter("story", TaskType::Creative, "llama", 10))
            .unwrap();

        // Bump code-b's use count.
        mgr.load("code-b").unwrap();

        let selected = mgr.auto_select(TaskType::Coding, "llama").unwrap().unwrap();
        assert_eq!(selected.adapter.id, "code-b");

        assert!(
            mgr.auto_select(TaskType::Translation, "llama")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn oversized_adapter_rejected() {
        let mgr = manager(2, 100);
        mgr.register(adapter("big", TaskType::Coding, "base", 500))
            .unwrap();
        assert!(mgr.load("big").is_err());
    }
}
