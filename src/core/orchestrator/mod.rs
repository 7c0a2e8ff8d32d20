//! Orchestrator
//!
//! Maps a request to an (agent, model, provider) triple and executes it,
//! driving the fallback chain on failure. The orchestrator exclusively
//! owns the agent set and holds a borrow-handle to the registry; apart
//! from the guarded availability cache it is pure with respect to shared
//! state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::agents::{Agent, default_agents};
use crate::core::analyzer::{TaskContext, TaskType, analyze};
use crate::core::error::{GatewayError, Result};
use crate::core::providers::ProviderClient;
use crate::core::registry::ProviderRegistry;
use crate::core::types::{ChatMessage, ChatRequest, ChatResponse, RequestContext};

/// Orchestrator tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Drive the fallback chain on retryable failures
    pub failover_enabled: bool,
    /// Cap on fallback attempts after the original one
    pub max_retries: u32,
    /// How long a model stays marked unavailable
    pub availability_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            failover_enabled: true,
            max_retries: 3,
            availability_ttl: Duration::from_secs(30),
        }
    }
}

/// Result of one orchestrated execution
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub response: ChatResponse,
    /// Model that actually produced the response
    pub model: String,
    /// Provider that served it
    pub provider: String,
    /// Analyzer output that drove selection, absent for forced models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskContext>,
    /// Fallback attempts after the original one
    pub retries: u32,
    pub fallback_used: bool,
    /// Model originally selected, when a fallback served the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_model: Option<String>,
    #[serde(skip_serializing)]
    pub elapsed: Duration,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskResult {
    fn record_routing_metadata(&mut self) {
        self.metadata
            .insert("retries".to_string(), self.retries.into());
        self.metadata
            .insert("fallback_used".to_string(), self.fallback_used.into());
        if let Some(original) = &self.original_model {
            self.metadata
                .insert("original_model".to_string(), original.clone().into());
        }
    }
}

/// Request router: agent selection, model selection, fallback execution
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    agents: Vec<Agent>,
    config: OrchestratorConfig,
    /// Models recently observed unavailable. Advisory: entries are skipped
    /// during preferred-model iteration but re-probed once the fallback
    /// chain is entered, so stale entries self-heal.
    unavailable: Cache<String, ()>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, config: OrchestratorConfig) -> Self {
        let unavailable = Cache::builder()
            .max_capacity(1024)
            .time_to_live(config.availability_ttl)
            .build();
        Self {
            registry,
            agents: default_agents(),
            config,
            unavailable,
        }
    }

    pub fn with_agents(mut self, agents: Vec<Agent>) -> Self {
        self.agents = agents;
        self
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Pick the agent for a prompt: the one registered for the detected
    /// task type, or general when none is.
    pub fn select_agent(&self, prompt: &str, history: &[ChatMessage]) -> (&Agent, TaskContext) {
        let task = analyze(prompt, history);
        let agent = self
            .agents
            .iter()
            .find(|a| a.task_type == task.task_type)
            .or_else(|| self.agents.iter().find(|a| a.task_type == TaskType::General))
            .unwrap_or(&self.agents[0]);
        debug!(agent = %agent.name, task_type = %task.task_type, confidence = task.confidence, "agent selected");
        (agent, task)
    }

    /// Pick a model and a provider that lists it.
    ///
    /// High-quality tasks are restricted to the top three preferred models.
    /// Preferred models honor the availability cache; the fallback chain
    /// re-probes unconditionally.
    pub async fn select_model(
        &self,
        agent: &Agent,
        task: &TaskContext,
        ctx: &RequestContext,
    ) -> Result<(String, Arc<dyn ProviderClient>)> {
        let preferred: Vec<&String> = if task.requires_high_quality {
            agent.preferred_models.iter().take(3).collect()
        } else {
            agent.preferred_models.iter().collect()
        };

        for model in &preferred {
            if self.unavailable.contains_key(model.as_str()) {
                continue;
            }
            if let Some(provider) = self.find_provider_for(model, ctx).await {
                return Ok(((*model).clone(), provider));
            }
            self.unavailable.insert((*model).clone(), ());
        }

        for model in &agent.fallback_chain {
            if let Some(provider) = self.find_provider_for(model, ctx).await {
                // A hit invalidates any stale unavailability mark.
                self.unavailable.invalidate(model.as_str());
                return Ok((model.clone(), provider));
            }
        }

        Err(GatewayError::model_not_found(
            preferred
                .first()
                .map(|m| m.as_str())
                .unwrap_or("<no preferred model>"),
        ))
    }

    /// Find a provider listing the given model, for callers that bypass
    /// selection (forced models, streaming pass-through).
    pub async fn discover_provider(
        &self,
        model: &str,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn ProviderClient>> {
        self.find_provider_for(model, ctx)
            .await
            .ok_or_else(|| GatewayError::model_not_found(model))
    }

    /// First eligible provider whose model listing contains `model`.
    async fn find_provider_for(
        &self,
        model: &str,
        ctx: &RequestContext,
    ) -> Option<Arc<dyn ProviderClient>> {
        for provider in self.registry.eligible_providers() {
            match provider.list_models(ctx).await {
                Ok(models) if models.iter().any(|m| m.id == model) => return Some(provider),
                Ok(_) => {}
                Err(e) => {
                    debug!(provider = %provider.name(), error = %e, "model listing failed");
                }
            }
        }
        None
    }

    /// Execute a prompt end to end: agent, model, provider, fallback.
    ///
    /// `history` is the prior conversation; the prompt is appended as the
    /// final user message.
    pub async fn execute(
        &self,
        prompt: &str,
        history: Vec<ChatMessage>,
        ctx: &RequestContext,
    ) -> Result<TaskResult> {
        let mut messages = history;
        messages.push(crate::core::types::user_message(prompt));
        self.execute_messages(prompt, messages, ctx).await
    }

    /// Execute a full conversation, with `prompt` driving agent selection.
    async fn execute_messages(
        &self,
        prompt: &str,
        messages: Vec<ChatMessage>,
        ctx: &RequestContext,
    ) -> Result<TaskResult> {
        let (agent, task) = self.select_agent(prompt, &messages);
        let (model, provider) = self.select_model(agent, &task, ctx).await?;

        let started = Instant::now();
        let request = agent.build_request(&model, messages.clone());
        match self.attempt(agent, request, provider.clone(), ctx).await {
            Ok(response) => {
                let mut result = TaskResult {
                    model: model.clone(),
                    provider: provider.name().to_string(),
                    response,
                    task: Some(task),
                    retries: 0,
                    fallback_used: false,
                    original_model: None,
                    elapsed: started.elapsed(),
                    metadata: HashMap::new(),
                };
                result.record_routing_metadata();
                Ok(result)
            }
            Err(err) if self.config.failover_enabled && err.triggers_fallback() => {
                self.failover(agent, task, &model, messages, err, started, ctx)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    /// Iterate the remaining candidates until success or chain exhaustion,
    /// capped by `max_retries`.
    #[allow(clippy::too_many_arguments)]
    async fn failover(
        &self,
        agent: &Agent,
        task: TaskContext,
        failed_model: &str,
        messages: Vec<ChatMessage>,
        first_error: GatewayError,
        started: Instant,
        ctx: &RequestContext,
    ) -> Result<TaskResult> {
        let candidates: Vec<String> = agent
            .preferred_models
            .iter()
            .skip_while(|m| m.as_str() != failed_model)
            .skip(1)
            .chain(agent.fallback_chain.iter())
            .filter(|m| m.as_str() != failed_model)
            .cloned()
            .collect();

        let mut last_error = first_error;
        let mut retries = 0u32;

        for model in candidates {
            if retries >= self.config.max_retries {
                break;
            }
            if ctx.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            // Fallback always re-probes, ignoring the availability cache.
            let Some(provider) = self.find_provider_for(&model, ctx).await else {
                continue;
            };
            retries += 1;
            warn!(
                model = %model,
                provider = %provider.name(),
                retries,
                "falling back after {last_error}"
            );

            let request = agent.build_request(&model, messages.clone());
            match self.attempt(agent, request, provider.clone(), ctx).await {
                Ok(response) => {
                    info!(model = %model, retries, "fallback succeeded");
                    let mut result = TaskResult {
                        model: model.clone(),
                        provider: provider.name().to_string(),
                        response,
                        task: Some(task),
                        retries,
                        fallback_used: true,
                        original_model: Some(failed_model.to_string()),
                        elapsed: started.elapsed(),
                        metadata: HashMap::new(),
                    };
                    result.record_routing_metadata();
                    return Ok(result);
                }
                Err(err) => last_error = err,
            }
        }

        Err(last_error)
    }

    /// One provider attempt, recorded into the registry either way.
    async fn attempt(
        &self,
        agent: &Agent,
        request: ChatRequest,
        provider: Arc<dyn ProviderClient>,
        ctx: &RequestContext,
    ) -> Result<ChatResponse> {
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(GatewayError::Cancelled),
            outcome = agent.execute(request, provider.clone(), ctx) => outcome,
        };
        match outcome {
            Ok((response, elapsed)) => {
                self.registry.record_success(provider.name(), elapsed);
                Ok(response)
            }
            Err(err) => {
                self.registry.record_error(provider.name());
                Err(err)
            }
        }
    }

    /// Route a full chat request.
    ///
    /// `auto` (or an empty model) goes through agent selection. Any other
    /// model bypasses selection but still requires provider discovery.
    pub async fn route_request(
        &self,
        request: ChatRequest,
        ctx: &RequestContext,
    ) -> Result<TaskResult> {
        request.validate()?;
        let prompt = request
            .first_user_prompt()
            .ok_or_else(|| GatewayError::invalid_request("no user message in request"))?;

        if request.model.is_empty() || request.model == "auto" {
            // The first user message drives selection; the conversation
            // is sent unchanged.
            return self.execute_messages(&prompt, request.messages, ctx).await;
        }

        self.execute_forced(request, ctx).await
    }

    /// Execute with a caller-forced model.
    async fn execute_forced(&self, request: ChatRequest, ctx: &RequestContext) -> Result<TaskResult> {
        let model = request.model.clone();
        let provider = self
            .find_provider_for(&model, ctx)
            .await
            .ok_or_else(|| GatewayError::model_not_found(&model))?;

        let started = Instant::now();
        let response = match provider.chat_completion(request, ctx).await {
            Ok(response) => {
                self.registry.record_success(provider.name(), started.elapsed());
                response
            }
            Err(err) => {
                self.registry.record_error(provider.name());
                return Err(err);
            }
        };

        let mut result = TaskResult {
            model,
            provider: provider.name().to_string(),
            response,
            task: None,
            retries: 0,
            fallback_used: false,
            original_model: None,
            elapsed: started.elapsed(),
            metadata: HashMap::new(),
        };
        result.record_routing_metadata();
        Ok(result)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.agents.len())
            .field("failover_enabled", &self.config.failover_enabled)
            .finish()
    }
}
