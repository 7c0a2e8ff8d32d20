//! Provider abstraction
//!
//! Providers are a capability set, not an inheritance hierarchy: every
//! upstream kind implements [`ProviderClient`] and the rest of the gateway
//! only ever sees that trait.

pub mod openai_compat;
pub mod retry;
pub mod sse;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::error::Result;
use crate::core::types::{
    ChatChunk, ChatRequest, ChatResponse, CostModel, ModelInfo, ProviderFeature, RequestContext,
};

pub use openai_compat::OpenAiCompatClient;
pub use retry::RetryPolicy;

/// Sink for streaming chunks
///
/// Bounded so that a blocked downstream writer applies backpressure to the
/// upstream reader through the channel.
pub type ChunkSink = mpsc::Sender<Result<ChatChunk>>;

/// Upstream kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Commercial OpenAI API
    OpenAi,
    /// Local inference server speaking the OpenAI dialect
    Local,
    /// Any other OpenAI-compatible third party
    Compatible,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Compatible => write!(f, "compatible"),
        }
    }
}

/// Static description of one upstream provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Stable unique name, the registry key
    pub name: String,
    /// Kind tag
    pub kind: ProviderKind,
    /// Base endpoint, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Credential handle resolved against the configuration's credential map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Per-feature capability bits
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<ProviderFeature>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cost model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostModel>,
}

fn default_capabilities() -> Vec<ProviderFeature> {
    vec![
        ProviderFeature::Streaming,
        ProviderFeature::Tools,
        ProviderFeature::SystemMessage,
    ]
}

fn default_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, kind: ProviderKind, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: base_url.into(),
            credential: None,
            capabilities: default_capabilities(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: CostModel) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Uniform provider capability set
///
/// The only observable side effects of an implementation are the outbound
/// HTTP call and writes to the caller-supplied sink.
#[async_trait]
pub trait ProviderClient: Send + Sync + Debug {
    /// Stable provider name, unique across the registry
    fn name(&self) -> &str;

    /// Kind tag
    fn kind(&self) -> ProviderKind;

    /// Descriptor this client was built from
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Feature support query
    fn supports(&self, feature: ProviderFeature) -> bool {
        self.descriptor().capabilities.contains(&feature)
    }

    /// Execute a buffered chat completion.
    async fn chat_completion(
        &self,
        request: ChatRequest,
        ctx: &RequestContext,
    ) -> Result<ChatResponse>;

    /// Execute a streaming chat completion, forwarding chunks to `sink`.
    ///
    /// Resolves when the upstream stream ends (terminal event or EOF) or
    /// errors before the first chunk.
    async fn stream(
        &self,
        request: ChatRequest,
        sink: ChunkSink,
        ctx: &RequestContext,
    ) -> Result<()>;

    /// Lightweight liveness probe.
    async fn health_probe(&self, ctx: &RequestContext) -> Result<()>;

    /// List the models this provider exposes.
    async fn list_models(&self, ctx: &RequestContext) -> Result<Vec<ModelInfo>>;

    /// Cost of a request, when the provider carries a cost model.
    fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        self.descriptor()
            .cost
            .map(|c| c.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }
}
