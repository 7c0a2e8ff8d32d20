//! Routing scenarios: agent selection, provider discovery, and fallback

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::StubProvider;
use modelmux::core::analyzer::TaskType;
use modelmux::core::error::GatewayError;
use modelmux::core::orchestrator::{Orchestrator, OrchestratorConfig};
use modelmux::core::registry::{ProviderRegistry, ProviderStatus};
use modelmux::core::types::{ChatRequest, RequestContext};

const FIBONACCI_PROMPT: &str = "Write a Python function to calculate fibonacci numbers";

fn orchestrator_with(providers: Vec<Arc<StubProvider>>) -> (Orchestrator, Arc<ProviderRegistry>) {
    let registry = Arc::new(ProviderRegistry::new());
    for provider in providers {
        registry.register(provider).unwrap();
    }
    (
        Orchestrator::new(registry.clone(), OrchestratorConfig::default()),
        registry,
    )
}

#[tokio::test]
async fn coding_prompt_routes_to_codestral() {
    let provider = StubProvider::new("p1", &["codestral-latest", "gpt-4o"])
        .with_reply("def fibonacci(n): ...")
        .into_arc();
    let (orchestrator, _registry) = orchestrator_with(vec![provider.clone()]);
    let ctx = RequestContext::new();

    let result = orchestrator
        .execute(FIBONACCI_PROMPT, vec![], &ctx)
        .await
        .unwrap();

    let task = result.task.as_ref().unwrap();
    assert_eq!(task.task_type, TaskType::Coding);
    assert!(task.confidence >= 0.1);
    assert_eq!(task.language, "en");
    for keyword in ["write", "function", "python"] {
        assert!(task.keywords.iter().any(|k| k == keyword));
    }

    assert_eq!(result.model, "codestral-latest");
    assert_eq!(result.provider, "p1");
    assert!(!result.fallback_used);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn failed_provider_falls_back_to_next_model() {
    let p1 = StubProvider::new("p1", &["codestral-latest"])
        .failing_with_status(503)
        .into_arc();
    let p2 = StubProvider::new("p2", &["deepseek-coder"])
        .with_reply("def fibonacci(n): return n")
        .into_arc();
    let (orchestrator, _registry) = orchestrator_with(vec![p1.clone(), p2.clone()]);
    let ctx = RequestContext::new();

    let result = orchestrator
        .execute(FIBONACCI_PROMPT, vec![], &ctx)
        .await
        .unwrap();

    assert!(result.fallback_used);
    assert_eq!(result.retries, 1);
    assert_eq!(result.original_model.as_deref(), Some("codestral-latest"));
    assert_eq!(result.model, "deepseek-coder");
    assert_eq!(result.provider, "p2");
    assert_eq!(result.metadata["fallback_used"], serde_json::json!(true));
    assert_eq!(result.metadata["retries"], serde_json::json!(1));
    assert_eq!(
        result.metadata["original_model"],
        serde_json::json!("codestral-latest")
    );
}

#[tokio::test]
async fn empty_messages_never_reach_a_provider() {
    let provider = StubProvider::new("p1", &["gpt-4o"]).into_arc();
    let (orchestrator, _registry) = orchestrator_with(vec![provider.clone()]);
    let ctx = RequestContext::new();

    let request = ChatRequest::new("auto");
    let err = orchestrator.route_request(request, &ctx).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn excluded_providers_are_not_selected() {
    let provider = StubProvider::new("p1", &["codestral-latest"]).into_arc();
    let (orchestrator, registry) = orchestrator_with(vec![provider.clone()]);
    registry
        .set_status("p1", ProviderStatus::Maintenance)
        .unwrap();
    let ctx = RequestContext::new();

    let err = orchestrator
        .execute(FIBONACCI_PROMPT, vec![], &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ModelNotFound { .. }));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn forced_model_bypasses_selection_but_discovers_provider() {
    let provider = StubProvider::new("p1", &["special-model"])
        .with_reply("forced")
        .into_arc();
    let (orchestrator, _registry) = orchestrator_with(vec![provider.clone()]);
    let ctx = RequestContext::new();

    let request = ChatRequest::new("special-model").add_user_message("hi");
    let result = orchestrator.route_request(request, &ctx).await.unwrap();
    assert_eq!(result.model, "special-model");
    assert!(result.task.is_none());
    assert_eq!(provider.call_count(), 1);

    let missing = ChatRequest::new("nonexistent-model").add_user_message("hi");
    let err = orchestrator.route_request(missing, &ctx).await.unwrap_err();
    assert!(matches!(err, GatewayError::ModelNotFound { .. }));
}

#[tokio::test]
async fn registry_success_recording_is_observable_after_routing() {
    let provider = StubProvider::new("p1", &["codestral-latest"]).into_arc();
    let (orchestrator, registry) = orchestrator_with(vec![provider]);
    let ctx = RequestContext::new();

    let before = registry.state_of("p1").unwrap();
    orchestrator
        .execute(FIBONACCI_PROMPT, vec![], &ctx)
        .await
        .unwrap();
    let after = registry.state_of("p1").unwrap();

    assert_eq!(after.success_count, before.success_count + 1);
}

#[tokio::test]
async fn cancelled_context_aborts_before_fallback() {
    let p1 = StubProvider::new("p1", &["codestral-latest"])
        .failing_with_status(503)
        .into_arc();
    let p2 = StubProvider::new("p2", &["deepseek-coder"])
        .with_delay(Duration::from_millis(50))
        .into_arc();
    let (orchestrator, _registry) = orchestrator_with(vec![p1, p2.clone()]);

    let ctx = RequestContext::new();
    ctx.cancel.cancel();

    let err = orchestrator
        .execute(FIBONACCI_PROMPT, vec![], &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
    assert_eq!(p2.call_count(), 0);
}
