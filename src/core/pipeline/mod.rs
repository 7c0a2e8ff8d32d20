//! Pipeline engine
//!
//! A pipeline composes multiple provider calls under one strategy: chained
//! stages, parallel fan-out, draft-refine, quality cascades, consensus
//! synthesis, and multi-step decomposition. The engine exclusively owns a
//! pipeline for its lifetime; stage outputs are owned by the result they
//! produced.

pub mod engine;
pub mod transformer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::analyzer::TaskType;
use crate::core::types::{ChatRequest, ChatResponse};

pub use engine::PipelineEngine;
pub use transformer::{DefaultTransformer, RefineTransformer, StageTransformer};

/// Execution strategy tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStrategy {
    /// Stages in order, each seeing the previous output
    Sequential,
    /// All stages at once over the same input, aggregated by name
    Parallel,
    /// Fast draft, then a high-quality refinement of it
    DraftRefine,
    /// First stage whose response passes the quality gate wins
    Cascade,
    /// Parallel stages synthesized by an analysis agent
    Consensus,
    /// Reserved; currently executes as DraftRefine
    Speculative,
    /// Decompose into numbered steps, then solve
    MultiStep,
}

impl std::fmt::Display for PipelineStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            PipelineStrategy::Sequential => "sequential",
            PipelineStrategy::Parallel => "parallel",
            PipelineStrategy::DraftRefine => "draft_refine",
            PipelineStrategy::Cascade => "cascade",
            PipelineStrategy::Consensus => "consensus",
            PipelineStrategy::Speculative => "speculative",
            PipelineStrategy::MultiStep => "multi_step",
        };
        write!(f, "{tag}")
    }
}

/// One stage of a pipeline
#[derive(Clone)]
pub struct StageConfig {
    /// Stage name, the aggregation key for parallel strategies
    pub name: String,
    /// Agent tag executing this stage
    pub agent: TaskType,
    /// Input/output transformer; `None` uses the default
    pub transformer: Option<Arc<dyn StageTransformer>>,
    /// Timeout wrapping only this stage's provider call
    pub timeout: Option<Duration>,
    /// Retries with linear 1-second increments
    pub max_retries: u32,
    /// Optional stages may fail silently
    pub optional: bool,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, agent: TaskType) -> Self {
        Self {
            name: name.into(),
            agent,
            transformer: None,
            timeout: None,
            max_retries: 1,
            optional: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl std::fmt::Debug for StageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageConfig")
            .field("name", &self.name)
            .field("agent", &self.agent)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("optional", &self.optional)
            .finish()
    }
}

/// A strategy plus its ordered stage list
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub strategy: PipelineStrategy,
    pub stages: Vec<StageConfig>,
    /// Cascade quality gate: minimum acceptable response length
    pub min_response_length: usize,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        strategy: PipelineStrategy,
        stages: Vec<StageConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            stages,
            min_response_length: 20,
        }
    }

    pub fn with_min_response_length(mut self, min: usize) -> Self {
        self.min_response_length = min;
        self
    }

    /// Default two-stage draft-refine pipeline.
    pub fn draft_refine() -> Self {
        Self::new(
            "draft-refine",
            PipelineStrategy::DraftRefine,
            vec![
                StageConfig::new("draft", TaskType::Fast),
                StageConfig::new("refine", TaskType::General),
            ],
        )
    }

    /// Default cascade: a fast first attempt, then a stronger fallback.
    pub fn cascade(stage_timeout: Duration) -> Self {
        Self::new(
            "cascade",
            PipelineStrategy::Cascade,
            vec![
                StageConfig::new("primary", TaskType::Fast).with_timeout(stage_timeout),
                StageConfig::new("secondary", TaskType::General).with_timeout(stage_timeout * 2),
            ],
        )
    }

    /// Default three-perspective consensus pipeline.
    pub fn consensus() -> Self {
        Self::new(
            "consensus",
            PipelineStrategy::Consensus,
            vec![
                StageConfig::new("perspective-a", TaskType::General),
                StageConfig::new("perspective-b", TaskType::Analysis),
                StageConfig::new("perspective-c", TaskType::Creative),
            ],
        )
    }

    /// Default decompose-then-solve pipeline.
    pub fn multi_step() -> Self {
        Self::new(
            "multi-step",
            PipelineStrategy::MultiStep,
            vec![
                StageConfig::new("decompose", TaskType::Analysis),
                StageConfig::new("solve", TaskType::General),
            ],
        )
    }

    /// Configuration id used as the optimizer profile key.
    pub fn configuration_id(&self) -> String {
        format!("{}:{}", self.strategy, self.name)
    }
}

/// Output of one executed stage
#[derive(Debug, Clone, Serialize)]
pub struct StageOutput {
    pub stage_name: String,
    pub response: ChatResponse,
    #[serde(skip_serializing)]
    pub elapsed: Duration,
    pub tokens_used: u32,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageOutput {
    pub fn content(&self) -> String {
        self.response.first_content().unwrap_or_default()
    }
}

/// Final result of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub response: ChatResponse,
    pub stage_outputs: Vec<StageOutput>,
    #[serde(skip_serializing)]
    pub total_elapsed: Duration,
    pub total_tokens: u32,
    pub total_cost: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Input handed to a stage transformer
pub struct StageInput<'a> {
    /// The original, untransformed request
    pub original: &'a ChatRequest,
    /// Output of the preceding stage, `None` for stage 0
    pub previous: Option<&'a StageOutput>,
}
