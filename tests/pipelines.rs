//! Pipeline strategy scenarios

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::StubProvider;
use modelmux::core::agents::{Agent, DecodingDefaults};
use modelmux::core::analyzer::TaskType;
use modelmux::core::error::GatewayError;
use modelmux::core::orchestrator::{Orchestrator, OrchestratorConfig};
use modelmux::core::pipeline::{Pipeline, PipelineEngine, PipelineStrategy, StageConfig};
use modelmux::core::registry::ProviderRegistry;
use modelmux::core::types::{ChatRequest, RequestContext};

const LONG_REPLY: &str =
    "Artificial intelligence is the study of systems able to perform tasks on";

fn agent(task_type: TaskType, name: &str, model: &str) -> Agent {
    Agent {
        task_type,
        name: name.to_string(),
        preferred_models: vec![model.to_string()],
        fallback_chain: vec![],
        decoding: DecodingDefaults::default(),
    }
}

/// Engine over stubs, with each task type pinned to one model so tests can
/// script which stub serves which stage.
fn engine_with(
    providers: Vec<Arc<StubProvider>>,
    agents: Vec<Agent>,
) -> Arc<PipelineEngine> {
    let registry = Arc::new(ProviderRegistry::new());
    for provider in providers {
        registry.register(provider).unwrap();
    }
    let orchestrator =
        Orchestrator::new(registry, OrchestratorConfig::default()).with_agents(agents);
    Arc::new(PipelineEngine::new(Arc::new(orchestrator)))
}

fn fast_and_general(fast_model: &str, general_model: &str) -> Vec<Agent> {
    vec![
        agent(TaskType::Fast, "fast", fast_model),
        agent(TaskType::General, "general", general_model),
    ]
}

#[tokio::test]
async fn draft_refine_produces_refined_final() {
    let draft_provider = StubProvider::new("draft-p", &["fast-model"])
        .with_reply("Short.")
        .with_delay(Duration::from_millis(50))
        .with_usage(15, 15)
        .into_arc();
    let refine_provider = StubProvider::new("refine-p", &["strong-model"])
        .with_reply(LONG_REPLY)
        .with_delay(Duration::from_millis(500))
        .with_usage(15, 15)
        .into_arc();
    let engine = engine_with(
        vec![draft_provider, refine_provider],
        fast_and_general("fast-model", "strong-model"),
    );

    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    let result = engine
        .execute(&Pipeline::draft_refine(), &request, &ctx)
        .await
        .unwrap();

    assert_eq!(
        result.response.first_content().as_deref(),
        Some(LONG_REPLY)
    );
    assert_eq!(result.stage_outputs.len(), 2);
    assert_eq!(result.stage_outputs[0].stage_name, "draft");
    assert_eq!(result.stage_outputs[1].stage_name, "refine");
    assert_eq!(result.total_tokens, 60);
    assert!(result.total_elapsed >= Duration::from_millis(550));

    let metrics = engine.metrics(&Pipeline::draft_refine()).unwrap();
    assert_eq!(metrics.executions, 1);
    assert_eq!(metrics.total_tokens, 60);
}

#[tokio::test]
async fn cascade_quality_gate_accepts_second_stage() {
    let short_provider = StubProvider::new("short-p", &["fast-model"])
        .with_reply("Short.")
        .into_arc();
    let long_provider = StubProvider::new("long-p", &["strong-model"])
        .with_reply(LONG_REPLY)
        .into_arc();
    let engine = engine_with(
        vec![short_provider, long_provider],
        fast_and_general("fast-model", "strong-model"),
    );

    let pipeline =
        Pipeline::cascade(Duration::from_secs(2)).with_min_response_length(20);
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    let result = engine.execute(&pipeline, &request, &ctx).await.unwrap();

    assert_eq!(result.metadata["successful_stage"], serde_json::json!(1));
    assert_eq!(result.metadata["stages_tried"], serde_json::json!(2));
    assert!(result.response.first_content().unwrap().len() >= 20);
}

#[tokio::test]
async fn cascade_fails_when_no_stage_passes_the_gate() {
    let short_provider = StubProvider::new("short-p", &["fast-model"])
        .with_reply("nope")
        .into_arc();
    let another = StubProvider::new("another-p", &["strong-model"])
        .with_reply("still no")
        .into_arc();
    let engine = engine_with(
        vec![short_provider, another],
        fast_and_general("fast-model", "strong-model"),
    );

    let pipeline =
        Pipeline::cascade(Duration::from_secs(2)).with_min_response_length(200);
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    let err = engine.execute(&pipeline, &request, &ctx).await.unwrap_err();
    assert!(matches!(err, GatewayError::QualityFailed { .. }));
}

#[tokio::test]
async fn consensus_runs_stages_in_parallel_and_synthesizes() {
    let a = StubProvider::new("a-p", &["model-a"])
        .with_reply("A")
        .with_delay(Duration::from_millis(100))
        .with_usage(10, 10)
        .into_arc();
    let b = StubProvider::new("b-p", &["model-b"])
        .with_reply("B-with-more")
        .with_delay(Duration::from_millis(150))
        .with_usage(10, 10)
        .into_arc();
    let c = StubProvider::new("c-p", &["model-c"])
        .with_reply("C-with-even-more")
        .with_delay(Duration::from_millis(200))
        .with_usage(10, 10)
        .into_arc();
    let synth = StubProvider::new("synth-p", &["model-synth"])
        .with_reply("Synthesis of A, B and C")
        .with_usage(10, 10)
        .into_arc();

    // Each perspective pins to its own stub; the synthesis goes through
    // the analysis agent.
    let agents = vec![
        agent(TaskType::General, "general", "model-a"),
        agent(TaskType::Translation, "translation", "model-b"),
        agent(TaskType::Creative, "creative", "model-c"),
        agent(TaskType::Analysis, "analysis", "model-synth"),
    ];
    let engine = engine_with(vec![a, b, c, synth], agents);

    let pipeline = Pipeline::new(
        "consensus",
        PipelineStrategy::Consensus,
        vec![
            StageConfig::new("perspective-a", TaskType::General),
            StageConfig::new("perspective-b", TaskType::Translation),
            StageConfig::new("perspective-c", TaskType::Creative),
        ],
    );
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();

    let started = Instant::now();
    let result = engine.execute(&pipeline, &request, &ctx).await.unwrap();
    let wall = started.elapsed();

    assert_eq!(result.stage_outputs.len(), 3);
    // Stages overlap: the wall clock tracks the slowest stage, not the sum.
    assert!(wall < Duration::from_millis(300), "wall was {wall:?}");
    assert_eq!(
        result.response.first_content().as_deref(),
        Some("Synthesis of A, B and C")
    );
    // Token totals cover the perspectives only.
    assert_eq!(result.total_tokens, 60);
}

#[tokio::test]
async fn parallel_aggregates_successes_by_stage_name() {
    let a = StubProvider::new("a-p", &["model-a"]).with_reply("alpha").into_arc();
    let b = StubProvider::new("b-p", &["model-b"]).with_reply("beta").into_arc();
    let agents = vec![
        agent(TaskType::General, "general", "model-a"),
        agent(TaskType::Analysis, "analysis", "model-b"),
    ];
    let engine = engine_with(vec![a, b], agents);

    let pipeline = Pipeline::new(
        "parallel",
        PipelineStrategy::Parallel,
        vec![
            StageConfig::new("first", TaskType::General),
            StageConfig::new("second", TaskType::Analysis),
        ],
    );
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    let result = engine.execute(&pipeline, &request, &ctx).await.unwrap();

    let content = result.response.first_content().unwrap();
    assert!(content.contains("## first\nalpha"));
    assert!(content.contains("## second\nbeta"));
    assert_eq!(result.stage_outputs.len(), 2);
}

#[tokio::test]
async fn parallel_fails_only_when_every_stage_fails() {
    let broken = StubProvider::new("broken-p", &["model-a"])
        .failing_with_status(503)
        .into_arc();
    let ok = StubProvider::new("ok-p", &["model-b"]).with_reply("fine").into_arc();
    let agents = vec![
        agent(TaskType::General, "general", "model-a"),
        agent(TaskType::Analysis, "analysis", "model-b"),
    ];
    let engine = engine_with(vec![broken, ok], agents);

    let pipeline = Pipeline::new(
        "parallel",
        PipelineStrategy::Parallel,
        vec![
            StageConfig::new("first", TaskType::General),
            StageConfig::new("second", TaskType::Analysis),
        ],
    );
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    let result = engine.execute(&pipeline, &request, &ctx).await.unwrap();
    assert_eq!(result.stage_outputs.len(), 1);
    assert!(result.response.first_content().unwrap().contains("fine"));
}

#[tokio::test]
async fn sequential_optional_stage_fails_silently() {
    let ok = StubProvider::new("ok-p", &["model-a"]).with_reply("done").into_arc();
    let broken = StubProvider::new("broken-p", &["model-b"])
        .failing_with_status(500)
        .into_arc();
    let agents = vec![
        agent(TaskType::General, "general", "model-a"),
        agent(TaskType::Analysis, "analysis", "model-b"),
    ];
    let engine = engine_with(vec![ok, broken], agents);

    let pipeline = Pipeline::new(
        "seq",
        PipelineStrategy::Sequential,
        vec![
            StageConfig::new("first", TaskType::General),
            StageConfig::new("enrich", TaskType::Analysis).optional(),
            StageConfig::new("final", TaskType::General),
        ],
    );
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    let result = engine.execute(&pipeline, &request, &ctx).await.unwrap();

    assert_eq!(result.stage_outputs.len(), 2);
    assert_eq!(result.stage_outputs.last().unwrap().stage_name, "final");
}

#[tokio::test]
async fn multi_step_solves_with_the_decomposition() {
    let planner = StubProvider::new("plan-p", &["model-plan"])
        .with_reply("1. First\n2. Second")
        .into_arc();
    let solver = StubProvider::new("solve-p", &["model-solve"])
        .with_reply("Executed both steps")
        .into_arc();
    let agents = vec![
        agent(TaskType::Analysis, "analysis", "model-plan"),
        agent(TaskType::General, "general", "model-solve"),
    ];
    let engine = engine_with(vec![planner, solver], agents);

    let request = ChatRequest::new("auto").add_user_message("Plan a migration");
    let ctx = RequestContext::new();
    let result = engine
        .execute(&Pipeline::multi_step(), &request, &ctx)
        .await
        .unwrap();

    assert_eq!(result.stage_outputs.len(), 2);
    assert_eq!(result.stage_outputs[0].stage_name, "decompose");
    assert_eq!(result.stage_outputs[1].stage_name, "solve");
    assert_eq!(
        result.response.first_content().as_deref(),
        Some("Executed both steps")
    );
}

#[tokio::test]
async fn speculative_equals_draft_refine() {
    let draft = StubProvider::new("draft-p", &["fast-model"])
        .with_reply("Short.")
        .into_arc();
    let refine = StubProvider::new("refine-p", &["strong-model"])
        .with_reply(LONG_REPLY)
        .into_arc();
    let engine = engine_with(
        vec![draft, refine],
        fast_and_general("fast-model", "strong-model"),
    );

    let pipeline = Pipeline::new(
        "speculative",
        PipelineStrategy::Speculative,
        vec![
            StageConfig::new("draft", TaskType::Fast),
            StageConfig::new("refine", TaskType::General),
        ],
    );
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    let result = engine.execute(&pipeline, &request, &ctx).await.unwrap();
    assert_eq!(result.response.first_content().as_deref(), Some(LONG_REPLY));
}

#[tokio::test]
async fn cancellation_returns_no_partial_result() {
    let slow = StubProvider::new("slow-p", &["model-a"])
        .with_reply("late")
        .with_delay(Duration::from_secs(5))
        .into_arc();
    let agents = vec![agent(TaskType::General, "general", "model-a")];
    let engine = engine_with(vec![slow], agents);

    let pipeline = Pipeline::new(
        "seq",
        PipelineStrategy::Sequential,
        vec![StageConfig::new("only", TaskType::General)],
    );
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    ctx.cancel.cancel();

    let err = engine.execute(&pipeline, &request, &ctx).await.unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
}

#[tokio::test]
async fn stage_timeout_wraps_only_that_stage() {
    let slow = StubProvider::new("slow-p", &["fast-model"])
        .with_reply("late")
        .with_delay(Duration::from_millis(500))
        .into_arc();
    let quick = StubProvider::new("quick-p", &["strong-model"])
        .with_reply(LONG_REPLY)
        .into_arc();
    let engine = engine_with(
        vec![slow, quick],
        fast_and_general("fast-model", "strong-model"),
    );

    // Stage 0 times out at 50ms and fails its gate; stage 1 has room.
    let pipeline = Pipeline::new(
        "cascade",
        PipelineStrategy::Cascade,
        vec![
            StageConfig::new("primary", TaskType::Fast)
                .with_timeout(Duration::from_millis(50)),
            StageConfig::new("secondary", TaskType::General)
                .with_timeout(Duration::from_secs(2)),
        ],
    );
    let request = ChatRequest::new("auto").add_user_message("Explain AI");
    let ctx = RequestContext::new();
    let result = engine.execute(&pipeline, &request, &ctx).await.unwrap();
    assert_eq!(result.metadata["successful_stage"], serde_json::json!(1));
}
