//! OpenAI-style chat completions endpoint

use std::time::Instant;

use actix_web::{HttpRequest, HttpResponse, web};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::errors;
use crate::core::error::GatewayError;
use crate::core::optimizer::{ExecutionRecord, Objective};
use crate::core::pipeline::{Pipeline, PipelineResult, PipelineStrategy, StageConfig};
use crate::core::streaming::sse_chat_response;
use crate::core::types::{ChatRequest, ChatResponse, FinishReason, RequestContext};
use crate::server::auth::AuthPrincipal;
use crate::server::state::AppState;
use crate::storage::RequestLogRecord;

/// Channel capacity between the upstream reader and the SSE writer; the
/// bound is what carries socket backpressure upstream.
const STREAM_BUFFER: usize = 32;

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ChatRequest>,
) -> HttpResponse {
    let principal = match state.auth.authenticate(&req).await {
        Ok(principal) => principal,
        Err(err) => return errors::openai_error(err),
    };

    let request = body.into_inner();
    info!(model = %request.model, stream = request.stream, user = %principal.user_id, "chat completion request");
    if let Err(err) = request.validate() {
        return errors::openai_error(err);
    }

    let ctx = RequestContext::authenticated(
        principal.user_id.clone(),
        principal.role.clone(),
        principal.rate_limit,
    );

    match pipeline_for_model(&state, &request.model) {
        Some(pipeline) => {
            let mut inner = request.clone();
            inner.model = "auto".to_string();
            if request.stream {
                stream_pipeline(state, pipeline, inner, ctx)
            } else {
                run_pipeline(state, pipeline, inner, principal, ctx).await
            }
        }
        None if request.stream => stream_direct(state, request, ctx).await,
        None => run_direct(state, request, principal, ctx).await,
    }
}

/// Resolve `pipeline:<strategy>` model names to a pipeline; `pipeline:auto`
/// asks the optimizer.
fn pipeline_for_model(state: &AppState, model: &str) -> Option<Pipeline> {
    let strategy = model.strip_prefix("pipeline:")?;
    let strategy = match strategy {
        "auto" => state.optimizer.select_optimal_strategy(Objective::Balanced).0,
        "sequential" => PipelineStrategy::Sequential,
        "parallel" => PipelineStrategy::Parallel,
        "draft_refine" => PipelineStrategy::DraftRefine,
        "cascade" => PipelineStrategy::Cascade,
        "consensus" => PipelineStrategy::Consensus,
        "speculative" => PipelineStrategy::Speculative,
        "multi_step" => PipelineStrategy::MultiStep,
        _ => return None,
    };
    Some(default_pipeline(strategy))
}

fn default_pipeline(strategy: PipelineStrategy) -> Pipeline {
    use crate::core::analyzer::TaskType;
    match strategy {
        PipelineStrategy::DraftRefine | PipelineStrategy::Speculative => Pipeline::draft_refine(),
        PipelineStrategy::Cascade => Pipeline::cascade(std::time::Duration::from_secs(2)),
        PipelineStrategy::Consensus => Pipeline::consensus(),
        PipelineStrategy::MultiStep => Pipeline::multi_step(),
        PipelineStrategy::Parallel => Pipeline::new(
            "parallel",
            PipelineStrategy::Parallel,
            vec![
                StageConfig::new("perspective-a", TaskType::General),
                StageConfig::new("perspective-b", TaskType::Analysis),
            ],
        ),
        PipelineStrategy::Sequential => Pipeline::new(
            "sequential",
            PipelineStrategy::Sequential,
            vec![StageConfig::new("respond", TaskType::General)],
        ),
    }
}

async fn run_direct(
    state: web::Data<AppState>,
    request: ChatRequest,
    principal: AuthPrincipal,
    ctx: RequestContext,
) -> HttpResponse {
    let started = Instant::now();
    match state.orchestrator.route_request(request, &ctx).await {
        Ok(result) => {
            log_request(
                &state,
                &ctx,
                &principal,
                &result.model,
                &result.provider,
                Some(&result.response),
                started,
                None,
            );
            HttpResponse::Ok().json(&result.response)
        }
        Err(err) => {
            error!(error = %err, "chat completion failed");
            log_request(&state, &ctx, &principal, "", "", None, started, Some(&err));
            errors::openai_error(err)
        }
    }
}

async fn run_pipeline(
    state: web::Data<AppState>,
    pipeline: Pipeline,
    request: ChatRequest,
    principal: AuthPrincipal,
    ctx: RequestContext,
) -> HttpResponse {
    let started = Instant::now();
    match state.engine.execute(&pipeline, &request, &ctx).await {
        Ok(result) => {
            record_pipeline_execution(&state, &pipeline, &result);
            log_request(
                &state,
                &ctx,
                &principal,
                &result.response.model,
                "pipeline",
                Some(&result.response),
                started,
                None,
            );
            HttpResponse::Ok().json(&result.response)
        }
        Err(err) => {
            error!(pipeline = %pipeline.name, error = %err, "pipeline failed");
            record_pipeline_failure(&state, &pipeline, started);
            errors::openai_error(err)
        }
    }
}

fn stream_pipeline(
    state: web::Data<AppState>,
    pipeline: Pipeline,
    request: ChatRequest,
    ctx: RequestContext,
) -> HttpResponse {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let writer_config = state.sse_writer_config();
    let cancel = ctx.cancel.clone();

    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(err) = engine.execute_streaming(&pipeline, &request, tx, &ctx).await {
            error!(pipeline = %pipeline.name, error = %err, "streaming pipeline failed");
        }
    });

    sse_chat_response(rx, cancel, writer_config)
}

/// Direct streaming: a forced model streams straight through its
/// provider; `auto` streams through a single-stage pipeline so agent
/// selection still applies.
async fn stream_direct(
    state: web::Data<AppState>,
    request: ChatRequest,
    ctx: RequestContext,
) -> HttpResponse {
    if request.model.is_empty() || request.model == "auto" {
        let prompt = request.first_user_prompt().unwrap_or_default();
        let (agent, _task) = state.orchestrator.select_agent(&prompt, &request.messages);
        let pipeline = Pipeline::new(
            "direct",
            PipelineStrategy::Sequential,
            vec![StageConfig::new("respond", agent.task_type)],
        );
        let mut inner = request;
        inner.model = "auto".to_string();
        return stream_pipeline(state, pipeline, inner, ctx);
    }

    let writer_config = state.sse_writer_config();
    let cancel = ctx.cancel.clone();
    match spawn_chunk_stream(&state, request, ctx).await {
        Ok(rx) => sse_chat_response(rx, cancel, writer_config),
        Err(err) => errors::openai_error(err),
    }
}

/// Spawn a provider stream for a forced model, returning the chunk
/// receiver. Shared by both wire dialects.
pub(crate) async fn spawn_chunk_stream(
    state: &AppState,
    request: ChatRequest,
    ctx: RequestContext,
) -> crate::core::error::Result<mpsc::Receiver<crate::core::error::Result<crate::core::types::ChatChunk>>>
{
    let provider = state
        .orchestrator
        .discover_provider(&request.model, &ctx)
        .await?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let registry = state.registry.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        match provider.stream(request, tx, &ctx).await {
            Ok(()) => registry.record_success(provider.name(), started.elapsed()),
            Err(err) => {
                registry.record_error(provider.name());
                error!(provider = %provider.name(), error = %err, "direct stream failed");
            }
        }
    });
    Ok(rx)
}

fn record_pipeline_execution(state: &AppState, pipeline: &Pipeline, result: &PipelineResult) {
    let quality = match result.response.first_finish_reason() {
        Some(FinishReason::Stop) => 0.9,
        Some(FinishReason::Length) => 0.7,
        _ => 0.5,
    };
    state.optimizer.record_execution(ExecutionRecord::new(
        pipeline.configuration_id(),
        pipeline.strategy,
        result.total_elapsed,
        result.total_cost,
        quality,
        true,
    ));
    state.optimizer.auto_tune();
}

fn record_pipeline_failure(state: &AppState, pipeline: &Pipeline, started: Instant) {
    state.optimizer.record_execution(ExecutionRecord::new(
        pipeline.configuration_id(),
        pipeline.strategy,
        started.elapsed(),
        0.0,
        0.0,
        false,
    ));
    state.optimizer.auto_tune();
}

#[allow(clippy::too_many_arguments)]
fn log_request(
    state: &AppState,
    ctx: &RequestContext,
    principal: &AuthPrincipal,
    model: &str,
    provider: &str,
    response: Option<&ChatResponse>,
    started: Instant,
    err: Option<&GatewayError>,
) {
    let usage = response.and_then(|r| r.usage).unwrap_or_default();
    let record = RequestLogRecord {
        request_id: ctx.request_id.clone(),
        user_id: Some(principal.user_id.clone()),
        model: model.to_string(),
        provider: provider.to_string(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        latency_ms: started.elapsed().as_millis() as u64,
        success: err.is_none(),
        error: err.map(|e| e.to_string()),
        timestamp: Utc::now(),
    };
    let sink = state.request_log.clone();
    tokio::spawn(async move {
        let _ = sink.record_request(record).await;
    });
}
