//! Pipeline execution
//!
//! One engine instance drives a pipeline per call. Per-stage timeouts wrap
//! only that stage's provider call; retries use linear 1-second
//! increments; a client cancel propagates to every in-flight stage and the
//! pipeline returns no partial result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::transformer::{
    DecomposeTransformer, DefaultTransformer, RefineTransformer, SolveTransformer,
    StageTransformer,
};
use super::{Pipeline, PipelineResult, PipelineStrategy, StageConfig, StageInput, StageOutput};
use crate::core::agents::Agent;
use crate::core::analyzer::{TaskType, analyze};
use crate::core::error::{GatewayError, Result};
use crate::core::orchestrator::Orchestrator;
use crate::core::providers::ChunkSink;
use crate::core::types::{ChatRequest, ChatResponse, RequestContext, Usage};

/// Rolling per-pipeline metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    pub executions: u64,
    pub failures: u64,
    /// EWMA with α = 0.5
    pub avg_latency_ms: f64,
    pub total_tokens: u64,
}

/// Executes pipelines against the orchestrator's providers
pub struct PipelineEngine {
    orchestrator: Arc<Orchestrator>,
    metrics: RwLock<HashMap<String, PipelineMetrics>>,
}

impl PipelineEngine {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Execute a pipeline to completion.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<PipelineResult> {
        let started = Instant::now();
        let outcome = match pipeline.strategy {
            PipelineStrategy::Sequential => self.run_sequential(pipeline, request, ctx).await,
            PipelineStrategy::Parallel => self.run_parallel(pipeline, request, ctx).await,
            PipelineStrategy::DraftRefine | PipelineStrategy::Speculative => {
                self.run_draft_refine(pipeline, request, ctx).await
            }
            PipelineStrategy::Cascade => self.run_cascade(pipeline, request, ctx).await,
            PipelineStrategy::Consensus => self.run_consensus(pipeline, request, ctx).await,
            PipelineStrategy::MultiStep => self.run_multi_step(pipeline, request, ctx).await,
        };

        match outcome {
            Ok(mut result) => {
                result.total_elapsed = started.elapsed();
                self.record_completion(pipeline, &result);
                Ok(result)
            }
            Err(err) => {
                self.record_failure(pipeline);
                Err(err)
            }
        }
    }

    /// Streaming execution.
    ///
    /// A single-stage pipeline passes the stream straight through. Chained
    /// strategies run their prefix stages buffered and stream only the
    /// final stage; aggregate strategies (parallel, cascade) buffer fully
    /// and emit the final response as one chunk.
    pub async fn execute_streaming(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        sink: ChunkSink,
        ctx: &RequestContext,
    ) -> Result<()> {
        if pipeline.stages.len() == 1 {
            let stage = &pipeline.stages[0];
            let input = StageInput {
                original: request,
                previous: None,
            };
            let stage_request = self.stage_transformer(stage).transform_input(&input);
            let (agent, stage_request, provider) = self
                .prepare_stage(stage, stage_request, false, ctx)
                .await?;
            debug!(pipeline = %pipeline.name, stage = %stage.name, agent = %agent.name, "streaming single stage");
            return provider.stream(stage_request, sink, ctx).await;
        }

        match pipeline.strategy {
            PipelineStrategy::Sequential
            | PipelineStrategy::DraftRefine
            | PipelineStrategy::Speculative
            | PipelineStrategy::MultiStep => {
                self.stream_final_stage(pipeline, request, sink, ctx).await
            }
            PipelineStrategy::Parallel
            | PipelineStrategy::Cascade
            | PipelineStrategy::Consensus => {
                let result = self.execute(pipeline, request, ctx).await?;
                send_response_as_chunk(&sink, &result.response).await
            }
        }
    }

    /// Rolling metrics per pipeline configuration.
    pub fn metrics(&self, pipeline: &Pipeline) -> Option<PipelineMetrics> {
        self.metrics
            .read()
            .get(&pipeline.configuration_id())
            .cloned()
    }

    // ---- strategies ----

    async fn run_sequential(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<PipelineResult> {
        let mut outputs: Vec<StageOutput> = Vec::with_capacity(pipeline.stages.len());

        for stage in &pipeline.stages {
            if ctx.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let input = StageInput {
                original: request,
                previous: outputs.last(),
            };
            match self.run_stage(stage, input, false, ctx).await {
                Ok(output) => outputs.push(output),
                Err(_) if stage.optional => {
                    // Optional stages fail silently; the next stage sees
                    // the last successful output.
                    debug!(stage = %stage.name, "optional stage failed, skipping");
                }
                Err(err) => return Err(err),
            }
        }

        let last = outputs
            .pop()
            .ok_or_else(|| GatewayError::internal("sequential pipeline produced no output"))?;
        let response = last.response.clone();
        outputs.push(last);
        Ok(assemble(response, outputs, HashMap::new()))
    }

    async fn run_parallel(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<PipelineResult> {
        let runs = pipeline.stages.iter().map(|stage| {
            let input = StageInput {
                original: request,
                previous: None,
            };
            self.run_stage(stage, input, false, ctx)
        });
        let outcomes = futures::future::join_all(runs).await;
        if ctx.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let mut outputs = Vec::new();
        let mut last_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(output) => outputs.push(output),
                Err(err) => last_error = Some(err),
            }
        }
        if outputs.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| GatewayError::internal("parallel pipeline had no stages")));
        }

        // Aggregate successes by stage name.
        let aggregate = outputs
            .iter()
            .map(|o| format!("## {}\n{}", o.stage_name, o.content()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut response = ChatResponse::assistant(request.model.clone(), aggregate);
        response.usage = Some(summed_usage(&outputs));

        let mut metadata = HashMap::new();
        metadata.insert("stages_succeeded".to_string(), outputs.len().into());
        Ok(assemble(response, outputs, metadata))
    }

    async fn run_draft_refine(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<PipelineResult> {
        if pipeline.stages.len() < 2 {
            return Err(GatewayError::invalid_request(
                "draft-refine requires at least two stages",
            ));
        }
        let draft_stage = &pipeline.stages[0];
        let refine_stage = &pipeline.stages[1];

        let draft_input = StageInput {
            original: request,
            previous: None,
        };
        let draft = self
            .run_stage(draft_stage, draft_input, false, ctx)
            .await?;

        let refine_input = StageInput {
            original: request,
            previous: Some(&draft),
        };
        let refine_request = RefineTransformer.transform_input(&refine_input);
        // The refinement runs as a high-quality task regardless of the
        // original prompt's flags.
        let refined = self
            .run_prepared_stage(refine_stage, refine_request, true, ctx)
            .await?;

        let response = refined.response.clone();
        Ok(assemble(response, vec![draft, refined], HashMap::new()))
    }

    async fn run_cascade(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<PipelineResult> {
        let mut outputs = Vec::new();
        let mut accepted: Option<(usize, ChatResponse)> = None;
        let mut stages_tried = 0usize;

        for (index, stage) in pipeline.stages.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            stages_tried += 1;
            let input = StageInput {
                original: request,
                previous: None,
            };
            match self.run_stage(stage, input, false, ctx).await {
                Ok(output) => {
                    let passes = passes_quality_gate(&output, pipeline.min_response_length);
                    let response = output.response.clone();
                    outputs.push(output);
                    if passes {
                        accepted = Some((index, response));
                        break;
                    }
                    debug!(stage = %stage.name, "cascade stage failed quality gate");
                }
                Err(err) => {
                    warn!(stage = %stage.name, error = %err, "cascade stage errored");
                }
            }
        }

        let (successful_stage, response) = accepted.ok_or_else(|| {
            GatewayError::quality_failed(
                pipeline.name.clone(),
                "no cascade stage passed the quality gate",
            )
        })?;

        let mut metadata = HashMap::new();
        metadata.insert("successful_stage".to_string(), successful_stage.into());
        metadata.insert("stages_tried".to_string(), stages_tried.into());
        Ok(assemble(response, outputs, metadata))
    }

    async fn run_consensus(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<PipelineResult> {
        let runs = pipeline.stages.iter().map(|stage| {
            let input = StageInput {
                original: request,
                previous: None,
            };
            self.run_stage(stage, input, false, ctx)
        });
        let outcomes = futures::future::join_all(runs).await;
        if ctx.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let mut outputs = Vec::new();
        let mut last_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(output) => outputs.push(output),
                Err(err) => last_error = Some(err),
            }
        }
        if outputs.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| GatewayError::internal("consensus pipeline had no stages")));
        }

        // Synthesize through the analysis agent, outputs labeled by stage.
        let labeled = outputs
            .iter()
            .map(|o| format!("## {}\n{}", o.stage_name, o.content()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = request.first_user_prompt().unwrap_or_default();
        let mut synthesis_request = request.clone();
        synthesis_request.messages = vec![crate::core::types::user_message(format!(
            "Multiple assistants answered the question below. Synthesize \
             their answers into one final response.\n\n\
             Question:\n{prompt}\n\n{labeled}"
        ))];

        let synthesis_stage = StageConfig::new("synthesis", TaskType::Analysis);
        let synthesis = self
            .run_prepared_stage(&synthesis_stage, synthesis_request, false, ctx)
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert(
            "synthesis_tokens".to_string(),
            synthesis.tokens_used.into(),
        );
        metadata.insert("synthesis_model".to_string(), synthesis.response.model.clone().into());

        // The synthesis is the final response; stage outputs and token
        // totals cover only the parallel perspectives.
        Ok(assemble(synthesis.response, outputs, metadata))
    }

    async fn run_multi_step(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<PipelineResult> {
        if pipeline.stages.len() < 2 {
            return Err(GatewayError::invalid_request(
                "multi-step requires a decompose stage and a solve stage",
            ));
        }
        let decompose_stage = &pipeline.stages[0];
        let solve_stage = &pipeline.stages[1];

        let decompose_input = StageInput {
            original: request,
            previous: None,
        };
        let decompose_request = DecomposeTransformer.transform_input(&decompose_input);
        let plan = self
            .run_prepared_stage(decompose_stage, decompose_request, false, ctx)
            .await?;

        let solve_input = StageInput {
            original: request,
            previous: Some(&plan),
        };
        let solve_request = SolveTransformer.transform_input(&solve_input);
        let solution = self
            .run_prepared_stage(solve_stage, solve_request, false, ctx)
            .await?;

        let response = solution.response.clone();
        Ok(assemble(response, vec![plan, solution], HashMap::new()))
    }

    // ---- stage plumbing ----

    fn stage_transformer(&self, stage: &StageConfig) -> Arc<dyn StageTransformer> {
        stage
            .transformer
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultTransformer))
    }

    fn agent_for(&self, tag: TaskType) -> &Agent {
        self.orchestrator
            .agents()
            .iter()
            .find(|a| a.task_type == tag)
            .or_else(|| {
                self.orchestrator
                    .agents()
                    .iter()
                    .find(|a| a.task_type == TaskType::General)
            })
            .expect("agent table always contains a general agent")
    }

    /// Select model and provider for a stage and finalize its request.
    async fn prepare_stage(
        &self,
        stage: &StageConfig,
        mut stage_request: ChatRequest,
        force_high_quality: bool,
        ctx: &RequestContext,
    ) -> Result<(
        &Agent,
        ChatRequest,
        Arc<dyn crate::core::providers::ProviderClient>,
    )> {
        let agent = self.agent_for(stage.agent);

        let prompt = stage_request.first_user_prompt().unwrap_or_default();
        let mut task = analyze(&prompt, &[]);
        task.task_type = agent.task_type;
        if force_high_quality {
            task.requires_high_quality = true;
        }

        let (model, provider) = self.orchestrator.select_model(agent, &task, ctx).await?;
        stage_request.model = model;
        if stage_request.temperature.is_none() {
            stage_request.temperature = agent.decoding.temperature;
        }
        if stage_request.max_tokens.is_none() {
            stage_request.max_tokens = agent.decoding.max_tokens;
        }
        Ok((agent, stage_request, provider))
    }

    /// Run one stage from a transformer input.
    async fn run_stage(
        &self,
        stage: &StageConfig,
        input: StageInput<'_>,
        force_high_quality: bool,
        ctx: &RequestContext,
    ) -> Result<StageOutput> {
        let stage_request = self.stage_transformer(stage).transform_input(&input);
        self.run_prepared_stage(stage, stage_request, force_high_quality, ctx)
            .await
    }

    /// Run every stage but the last buffered, then stream the final stage.
    async fn stream_final_stage(
        &self,
        pipeline: &Pipeline,
        request: &ChatRequest,
        sink: ChunkSink,
        ctx: &RequestContext,
    ) -> Result<()> {
        let (final_stage, final_request, force_high_quality) = match pipeline.strategy {
            PipelineStrategy::DraftRefine | PipelineStrategy::Speculative => {
                if pipeline.stages.len() < 2 {
                    return Err(GatewayError::invalid_request(
                        "draft-refine requires at least two stages",
                    ));
                }
                let draft_input = StageInput {
                    original: request,
                    previous: None,
                };
                let draft = self
                    .run_stage(&pipeline.stages[0], draft_input, false, ctx)
                    .await?;
                let refine_input = StageInput {
                    original: request,
                    previous: Some(&draft),
                };
                (
                    &pipeline.stages[1],
                    RefineTransformer.transform_input(&refine_input),
                    true,
                )
            }
            PipelineStrategy::MultiStep => {
                if pipeline.stages.len() < 2 {
                    return Err(GatewayError::invalid_request(
                        "multi-step requires a decompose stage and a solve stage",
                    ));
                }
                let decompose_input = StageInput {
                    original: request,
                    previous: None,
                };
                let plan = self
                    .run_prepared_stage(
                        &pipeline.stages[0],
                        DecomposeTransformer.transform_input(&decompose_input),
                        false,
                        ctx,
                    )
                    .await?;
                let solve_input = StageInput {
                    original: request,
                    previous: Some(&plan),
                };
                (
                    &pipeline.stages[1],
                    SolveTransformer.transform_input(&solve_input),
                    false,
                )
            }
            // Sequential: run the prefix, then stream the last stage with
            // the default transformer over the last prefix output.
            _ => {
                let (prefix, last) = pipeline
                    .stages
                    .split_at(pipeline.stages.len().saturating_sub(1));
                let mut previous: Option<StageOutput> = None;
                for stage in prefix {
                    if ctx.is_cancelled() {
                        return Err(GatewayError::Cancelled);
                    }
                    let input = StageInput {
                        original: request,
                        previous: previous.as_ref(),
                    };
                    match self.run_stage(stage, input, false, ctx).await {
                        Ok(output) => previous = Some(output),
                        Err(_) if stage.optional => {}
                        Err(err) => return Err(err),
                    }
                }
                let final_stage = &last[0];
                let input = StageInput {
                    original: request,
                    previous: previous.as_ref(),
                };
                let final_request = self.stage_transformer(final_stage).transform_input(&input);
                (final_stage, final_request, false)
            }
        };

        let (_agent, final_request, provider) = self
            .prepare_stage(final_stage, final_request, force_high_quality, ctx)
            .await?;
        debug!(pipeline = %pipeline.name, stage = %final_stage.name, "streaming final stage");
        provider.stream(final_request, sink, ctx).await
    }

    /// Run one stage from an already-transformed request, with timeout and
    /// linear-backoff retries.
    async fn run_prepared_stage(
        &self,
        stage: &StageConfig,
        stage_request: ChatRequest,
        force_high_quality: bool,
        ctx: &RequestContext,
    ) -> Result<StageOutput> {
        let (_agent, stage_request, provider) = self
            .prepare_stage(stage, stage_request, force_high_quality, ctx)
            .await?;

        let started = Instant::now();
        let mut last_error = GatewayError::internal("stage never attempted");

        for attempt in 0..=stage.max_retries {
            if attempt > 0 {
                // Linear backoff: 1s, 2s, 3s...
                let delay = Duration::from_secs(attempt as u64);
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(GatewayError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let call = provider.chat_completion(stage_request.clone(), ctx);
            let bounded = async {
                match stage.timeout {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(GatewayError::timeout(
                            provider.name(),
                            format!("stage '{}' exceeded {limit:?}", stage.name),
                        )),
                    },
                    None => call.await,
                }
            };
            // A client cancel interrupts the in-flight call, not just the
            // gaps between attempts.
            let outcome = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(GatewayError::Cancelled),
                outcome = bounded => outcome,
            };

            match outcome {
                Ok(response) => {
                    let elapsed = started.elapsed();
                    let mut output = self
                        .stage_transformer(stage)
                        .transform_output(&stage.name, response, elapsed);
                    if output.tokens_used == 0 {
                        output.tokens_used = stage_request.estimate_input_tokens();
                    }
                    let usage = output.response.usage.unwrap_or_default();
                    let cost = provider.calculate_cost(usage.prompt_tokens, usage.completion_tokens);
                    output.metadata.insert("cost".to_string(), cost.into());
                    output
                        .metadata
                        .insert("provider".to_string(), provider.name().to_string().into());
                    return Ok(output);
                }
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(err) => {
                    warn!(stage = %stage.name, attempt, error = %err, "stage attempt failed");
                    last_error = err;
                    if !last_error.is_retryable() {
                        break;
                    }
                }
            }
        }

        Err(last_error)
    }

    // ---- metrics ----

    fn record_completion(&self, pipeline: &Pipeline, result: &PipelineResult) {
        let mut metrics = self.metrics.write();
        let entry = metrics.entry(pipeline.configuration_id()).or_default();
        entry.executions += 1;
        entry.total_tokens += result.total_tokens as u64;
        let latency_ms = result.total_elapsed.as_secs_f64() * 1000.0;
        entry.avg_latency_ms = if entry.executions == 1 {
            latency_ms
        } else {
            (entry.avg_latency_ms + latency_ms) / 2.0
        };
        info!(
            pipeline = %pipeline.name,
            strategy = %pipeline.strategy,
            stages = result.stage_outputs.len(),
            tokens = result.total_tokens,
            "pipeline completed"
        );
    }

    fn record_failure(&self, pipeline: &Pipeline) {
        let mut metrics = self.metrics.write();
        metrics
            .entry(pipeline.configuration_id())
            .or_default()
            .failures += 1;
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine").finish()
    }
}

// ---- helpers ----

fn passes_quality_gate(output: &StageOutput, min_response_length: usize) -> bool {
    output.content().len() >= min_response_length
        && output.response.first_finish_reason() != Some(crate::core::types::FinishReason::Error)
}

fn summed_usage(outputs: &[StageOutput]) -> Usage {
    let mut total = Usage::default();
    for output in outputs {
        if let Some(usage) = output.response.usage {
            total.add(&usage);
        }
    }
    total
}

fn assemble(
    response: ChatResponse,
    outputs: Vec<StageOutput>,
    metadata: HashMap<String, serde_json::Value>,
) -> PipelineResult {
    let total_tokens = outputs.iter().map(|o| o.tokens_used).sum();
    let total_cost = outputs
        .iter()
        .filter_map(|o| o.metadata.get("cost").and_then(|v| v.as_f64()))
        .sum();
    PipelineResult {
        response,
        stage_outputs: outputs,
        total_elapsed: Duration::ZERO,
        total_tokens,
        total_cost,
        metadata,
    }
}

async fn send_response_as_chunk(sink: &ChunkSink, response: &ChatResponse) -> Result<()> {
    use crate::core::types::{ChatChunk, ChatDelta, ChatStreamChoice, FinishReason, MessageRole};

    let chunk = ChatChunk {
        id: response.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: response.created,
        model: response.model.clone(),
        choices: vec![ChatStreamChoice {
            index: 0,
            delta: ChatDelta {
                role: Some(MessageRole::Assistant),
                content: response.first_content(),
                tool_calls: None,
            },
            finish_reason: response.first_finish_reason().or(Some(FinishReason::Stop)),
        }],
        usage: response.usage,
    };
    sink.send(Ok(chunk))
        .await
        .map_err(|_| GatewayError::Cancelled)
}
