//! Application state shared across HTTP handlers

use std::sync::Arc;

use crate::config::Config;
use crate::core::lora::LoraManager;
use crate::core::optimizer::Optimizer;
use crate::core::orchestrator::Orchestrator;
use crate::core::pipeline::PipelineEngine;
use crate::core::registry::ProviderRegistry;
use crate::server::auth::AuthGate;
use crate::storage::RequestLogSink;

/// Shared server state
///
/// Every field is behind an `Arc`; handlers clone the state cheaply.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub engine: Arc<PipelineEngine>,
    pub optimizer: Arc<Optimizer>,
    pub lora: Arc<LoraManager>,
    pub auth: Arc<dyn AuthGate>,
    pub request_log: Arc<dyn RequestLogSink>,
}

impl AppState {
    /// SSE writer settings derived from the server configuration.
    pub fn sse_writer_config(&self) -> crate::core::streaming::SseWriterConfig {
        crate::core::streaming::SseWriterConfig {
            heartbeat_interval: std::time::Duration::from_secs(
                self.config.server.heartbeat_interval_secs,
            ),
            write_deadline: std::time::Duration::from_secs(self.config.server.write_deadline_secs),
        }
    }
}
