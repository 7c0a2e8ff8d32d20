//! HTTP server assembly
//!
//! Wires configuration into the request-path runtime: registers providers,
//! starts the health monitor, and serves the wire API.

pub mod auth;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer as ActixServer, web};
use tracing::info;

use crate::config::Config;
use crate::core::error::{GatewayError, Result};
use crate::core::health::HealthMonitor;
use crate::core::lora::{LoraManager, PoolLimits};
use crate::core::optimizer::Optimizer;
use crate::core::orchestrator::Orchestrator;
use crate::core::pipeline::PipelineEngine;
use crate::core::providers::{OpenAiCompatClient, ProviderClient};
use crate::core::registry::ProviderRegistry;
use crate::server::auth::{AllowAll, AuthGate};
use crate::server::state::AppState;
use crate::storage::{MemoryStore, RequestLogSink, persist_registry};

/// Build the shared application state from a configuration.
///
/// Providers from the configuration are constructed as OpenAI-compatible
/// clients with their credentials resolved from the credential map.
pub fn build_state(
    config: Config,
    auth: Arc<dyn AuthGate>,
    request_log: Arc<dyn RequestLogSink>,
) -> Result<AppState> {
    let registry = Arc::new(ProviderRegistry::new());
    for descriptor in &config.providers {
        let credential = config.credential_for(descriptor);
        let client: Arc<dyn ProviderClient> =
            Arc::new(OpenAiCompatClient::new(descriptor.clone(), credential)?);
        registry.register(client)?;
    }

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        config.router.to_orchestrator_config(),
    ));
    let engine = Arc::new(PipelineEngine::new(orchestrator.clone()));
    let optimizer = Arc::new(Optimizer::new(config.optimizer.to_weights()));
    let lora = Arc::new(LoraManager::new(PoolLimits {
        max_loaded: config.lora.max_loaded,
        max_memory_bytes: config.lora.max_memory_bytes,
    }));

    Ok(AppState {
        config: Arc::new(config),
        registry,
        orchestrator,
        engine,
        optimizer,
        lora,
        auth,
        request_log,
    })
}

/// Run the gateway server until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(config, Arc::new(AllowAll), store.clone())?;

    let monitor = HealthMonitor::new(
        state.registry.clone(),
        Duration::from_secs(state.config.health.check_interval_secs),
    );
    let monitor_cancel = monitor.cancellation();
    monitor.spawn();

    // Persist registry snapshots to the storage gates on the same cadence
    // as the health monitor.
    let snapshot_registry = state.registry.clone();
    let snapshot_store = store.clone();
    let snapshot_cancel = monitor_cancel.child_token();
    let snapshot_interval = Duration::from_secs(state.config.health.check_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(snapshot_interval);
        loop {
            tokio::select! {
                _ = snapshot_cancel.cancelled() => return,
                _ = interval.tick() => {
                    persist_registry(&snapshot_registry, snapshot_store.as_ref()).await;
                }
            }
        }
    });

    let bind = (state.config.server.host.clone(), state.config.server.port);
    info!(host = %bind.0, port = bind.1, providers = state.registry.list().len(), "gateway listening");

    let app_state = web::Data::new(state);
    let result = ActixServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure)
    })
    .bind(bind)
    .map_err(|e| GatewayError::configuration(format!("cannot bind server: {e}")))?
    .run()
    .await;

    monitor_cancel.cancel();
    result.map_err(|e| GatewayError::internal(format!("server error: {e}")))
}
