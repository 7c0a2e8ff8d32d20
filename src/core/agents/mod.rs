//! Task-specialized agents
//!
//! An agent is a configuration, not an object graph: a task-type tag, an
//! ordered preferred-model list, decoding defaults, and a capability
//! predicate that belongs to the tag. Dispatch is a table lookup.

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::analyzer::{TaskContext, TaskType};
use crate::core::error::Result;
use crate::core::providers::ProviderClient;
use crate::core::types::{ChatMessage, ChatRequest, ChatResponse, RequestContext};

/// Default decoding parameters an agent applies when the request does not
/// set its own
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DecodingDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A task-specialized agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Task-type tag
    pub task_type: TaskType,
    /// Human-readable name
    pub name: String,
    /// Preferred models, most capable plausible choice first
    pub preferred_models: Vec<String>,
    /// Models tried when every preferred model fails
    pub fallback_chain: Vec<String>,
    /// Decoding defaults
    pub decoding: DecodingDefaults,
}

impl Agent {
    /// Capability predicate over a task context.
    ///
    /// The predicate belongs to the tag: the fast agent also accepts any
    /// task flagged as urgent, and the general agent accepts everything.
    pub fn can_handle(&self, ctx: &TaskContext) -> bool {
        match self.task_type {
            TaskType::General => true,
            TaskType::Fast => ctx.task_type == TaskType::Fast || ctx.requires_fast_response,
            tag => ctx.task_type == tag,
        }
    }

    /// Build a chat request for this agent, applying decoding defaults to
    /// parameters the caller left unset.
    pub fn build_request(&self, model: &str, messages: Vec<ChatMessage>) -> ChatRequest {
        let mut request = ChatRequest::new(model);
        request.messages = messages;
        if request.temperature.is_none() {
            request.temperature = self.decoding.temperature;
        }
        if request.max_tokens.is_none() {
            request.max_tokens = self.decoding.max_tokens;
        }
        request
    }

    /// Issue a chat completion through the given provider.
    ///
    /// Returns the response and the elapsed wall time.
    pub async fn execute(
        &self,
        request: ChatRequest,
        provider: Arc<dyn ProviderClient>,
        ctx: &RequestContext,
    ) -> Result<(ChatResponse, std::time::Duration)> {
        debug!(agent = %self.name, model = %request.model, provider = %provider.name(), "agent executing");
        let started = Instant::now();
        let response = provider.chat_completion(request, ctx).await?;
        Ok((response, started.elapsed()))
    }
}

/// The default agent table.
pub fn default_agents() -> Vec<Agent> {
    DEFAULT_AGENTS.clone()
}

static DEFAULT_AGENTS: Lazy<Vec<Agent>> = Lazy::new(|| {
    vec![
        Agent {
            task_type: TaskType::Coding,
            name: "coding".to_string(),
            preferred_models: vec![
                "codestral-latest".to_string(),
                "deepseek-coder".to_string(),
                "gpt-4o".to_string(),
                "claude-3-5-sonnet-20241022".to_string(),
            ],
            fallback_chain: vec![
                "gpt-4o-mini".to_string(),
                "llama-3.1-70b-instruct".to_string(),
            ],
            decoding: DecodingDefaults {
                temperature: Some(0.2),
                max_tokens: None,
            },
        },
        Agent {
            task_type: TaskType::Creative,
            name: "creative".to_string(),
            preferred_models: vec![
                "gpt-4o".to_string(),
                "claude-3-5-sonnet-20241022".to_string(),
                "mistral-large-latest".to_string(),
            ],
            fallback_chain: vec!["gpt-4o-mini".to_string()],
            decoding: DecodingDefaults {
                temperature: Some(0.8),
                max_tokens: None,
            },
        },
        Agent {
            task_type: TaskType::Analysis,
            name: "analysis".to_string(),
            preferred_models: vec![
                "claude-3-5-sonnet-20241022".to_string(),
                "gpt-4o".to_string(),
                "deepseek-chat".to_string(),
            ],
            fallback_chain: vec!["gpt-4o-mini".to_string()],
            decoding: DecodingDefaults {
                temperature: Some(0.3),
                max_tokens: None,
            },
        },
        Agent {
            task_type: TaskType::Translation,
            name: "translation".to_string(),
            preferred_models: vec![
                "gpt-4o-mini".to_string(),
                "mistral-large-latest".to_string(),
                "gpt-4o".to_string(),
            ],
            fallback_chain: vec!["gpt-4o".to_string()],
            decoding: DecodingDefaults {
                temperature: Some(0.3),
                max_tokens: None,
            },
        },
        Agent {
            task_type: TaskType::Fast,
            name: "fast".to_string(),
            preferred_models: vec![
                "gpt-4o-mini".to_string(),
                "claude-3-5-haiku-20241022".to_string(),
                "mistral-small-latest".to_string(),
            ],
            fallback_chain: vec!["gpt-4o-mini".to_string()],
            decoding: DecodingDefaults {
                temperature: Some(0.5),
                max_tokens: Some(512),
            },
        },
        Agent {
            task_type: TaskType::General,
            name: "general".to_string(),
            preferred_models: vec![
                "gpt-4o".to_string(),
                "gpt-4o-mini".to_string(),
                "mistral-large-latest".to_string(),
            ],
            fallback_chain: vec!["gpt-4o-mini".to_string()],
            // Inherits whatever the request carries.
            decoding: DecodingDefaults::default(),
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analyzer::analyze;
    use crate::core::types::user_message;

    fn agent_for(task_type: TaskType) -> Agent {
        default_agents()
            .into_iter()
            .find(|a| a.task_type == task_type)
            .unwrap()
    }

    #[test]
    fn coding_agent_prefers_codestral() {
        let agent = agent_for(TaskType::Coding);
        assert_eq!(agent.preferred_models[0], "codestral-latest");
        assert_eq!(agent.decoding.temperature, Some(0.2));
    }

    #[test]
    fn can_handle_is_a_tag_predicate() {
        let coding = agent_for(TaskType::Coding);
        let general = agent_for(TaskType::General);
        let fast = agent_for(TaskType::Fast);

        let ctx = analyze("Write a Python function to calculate fibonacci numbers", &[]);
        assert!(coding.can_handle(&ctx));
        assert!(general.can_handle(&ctx));
        assert!(!fast.can_handle(&ctx));

        let urgent = analyze("quick, what time zone is Rome in", &[]);
        assert!(fast.can_handle(&urgent));
    }

    #[test]
    fn decoding_defaults_fill_unset_parameters() {
        let agent = agent_for(TaskType::Fast);
        let request = agent.build_request("gpt-4o-mini", vec![user_message("hi")]);
        assert_eq!(request.temperature, Some(0.5));
        assert_eq!(request.max_tokens, Some(512));
    }
}
