//! Stage transformers
//!
//! A transformer adapts the canonical request/response pair to a stage
//! role: it shapes the chat request a stage sends and wraps the response
//! into a [`StageOutput`].

use std::collections::HashMap;
use std::time::Duration;

use super::{StageInput, StageOutput};
use crate::core::types::{ChatRequest, ChatResponse, assistant_message, user_message};

/// Adapts requests and responses for one stage role
pub trait StageTransformer: Send + Sync {
    /// Build the chat request this stage will send.
    fn transform_input(&self, input: &StageInput<'_>) -> ChatRequest;

    /// Wrap the stage response into its output record.
    fn transform_output(
        &self,
        stage_name: &str,
        response: ChatResponse,
        elapsed: Duration,
    ) -> StageOutput {
        let tokens_used = response.total_tokens();
        StageOutput {
            stage_name: stage_name.to_string(),
            response,
            elapsed,
            tokens_used,
            metadata: HashMap::new(),
        }
    }
}

/// Default transformer
///
/// Stage 0 passes the original request through; later stages see the
/// original conversation with the prior stage's assistant message
/// appended as context.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransformer;

impl StageTransformer for DefaultTransformer {
    fn transform_input(&self, input: &StageInput<'_>) -> ChatRequest {
        let mut request = input.original.clone();
        if let Some(previous) = input.previous {
            request.messages.push(assistant_message(previous.content()));
        }
        request
    }
}

/// Draft-refine transformer for the refinement stage
///
/// Embeds the draft into a refinement prompt; the original user prompt is
/// restated so the refiner sees both.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefineTransformer;

impl StageTransformer for RefineTransformer {
    fn transform_input(&self, input: &StageInput<'_>) -> ChatRequest {
        let prompt = input.original.first_user_prompt().unwrap_or_default();
        let draft = input
            .previous
            .map(|p| p.content())
            .unwrap_or_default();

        let mut request = input.original.clone();
        request.messages = vec![user_message(format!(
            "Refine and improve the draft answer below.\n\n\
             Original request:\n{prompt}\n\n\
             Draft answer:\n{draft}\n\n\
             Produce a clearer, more complete final answer."
        ))];
        request
    }
}

/// Multi-step transformers: decompose, then solve with the plan appended.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecomposeTransformer;

impl StageTransformer for DecomposeTransformer {
    fn transform_input(&self, input: &StageInput<'_>) -> ChatRequest {
        let prompt = input.original.first_user_prompt().unwrap_or_default();
        let mut request = input.original.clone();
        request.messages = vec![user_message(format!(
            "Break this task into clear numbered steps:\n\n{prompt}"
        ))];
        request
    }
}

/// Solve stage: original request plus the decomposition as a plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveTransformer;

impl StageTransformer for SolveTransformer {
    fn transform_input(&self, input: &StageInput<'_>) -> ChatRequest {
        let prompt = input.original.first_user_prompt().unwrap_or_default();
        let plan = input.previous.map(|p| p.content()).unwrap_or_default();
        let mut request = input.original.clone();
        request.messages = vec![user_message(format!(
            "{prompt}\n\nFollow this plan:\n{plan}"
        ))];
        request
    }
}
