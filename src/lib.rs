//! # modelmux
//!
//! A high-performance LLM gateway: a unified OpenAI/Anthropic-compatible
//! API over a heterogeneous pool of upstream providers with intelligent
//! routing, multi-stage pipelines, streaming, and health tracking.
//!
//! ## Gateway mode
//!
//! ```rust,no_run
//! use modelmux::{Config, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config/gateway.yaml")?;
//!     Gateway::new(config).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Library mode
//!
//! ```rust,no_run
//! use modelmux::core::orchestrator::{Orchestrator, OrchestratorConfig};
//! use modelmux::core::registry::ProviderRegistry;
//! use modelmux::core::types::RequestContext;
//! use std::sync::Arc;
//!
//! # async fn demo() -> modelmux::Result<()> {
//! let registry = Arc::new(ProviderRegistry::new());
//! // ... register providers ...
//! let orchestrator = Orchestrator::new(registry, OrchestratorConfig::default());
//! let ctx = RequestContext::new();
//! let result = orchestrator
//!     .execute("Write a Python function to calculate fibonacci numbers", vec![], &ctx)
//!     .await?;
//! println!("{}", result.response.first_content().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod server;
pub mod storage;

pub use crate::config::Config;
pub use crate::core::error::{GatewayError, Result};
pub use crate::core::types::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, MessageContent, MessageRole,
    RequestContext, assistant_message, system_message, user_message,
};

/// Gateway entry point: configuration plus the HTTP server.
pub struct Gateway {
    config: Config,
}

impl Gateway {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Serve the wire API until shutdown.
    pub async fn run(self) -> Result<()> {
        server::run(self.config).await
    }
}

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
