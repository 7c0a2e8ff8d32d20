//! Anthropic-style messages endpoint
//!
//! Translates the Anthropic wire dialect to and from the canonical chat
//! types. Streaming follows the Anthropic event sequence: message_start,
//! content_block deltas, message_delta with the stop reason, message_stop.

use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::errors;
use crate::core::streaming::write_event;
use crate::core::types::{
    ChatRequest, ChatResponse, FinishReason, MessageRole, RequestContext, system_message,
};
use crate::server::state::AppState;

/// Anthropic messages request body
#[derive(Debug, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<InboundMessage>,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub role: String,
    pub content: InboundContent,
}

/// Anthropic content: a bare string or a block list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InboundContent {
    Text(String),
    Blocks(Vec<InboundBlock>),
}

#[derive(Debug, Deserialize)]
pub struct InboundBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl InboundContent {
    fn into_text(self) -> String {
        match self {
            InboundContent::Text(text) => text,
            InboundContent::Blocks(blocks) => blocks
                .into_iter()
                .filter(|b| b.block_type == "text")
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Anthropic messages response body
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub content: Vec<OutboundBlock>,
    pub model: String,
    pub stop_reason: String,
    pub usage: OutboundUsage,
}

#[derive(Debug, Serialize)]
pub struct OutboundBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct OutboundUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// `POST /v1/messages`
pub async fn messages(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<MessagesRequest>,
) -> HttpResponse {
    let principal = match state.auth.authenticate(&req).await {
        Ok(principal) => principal,
        Err(err) => return errors::anthropic_error(err),
    };

    let inbound = body.into_inner();
    info!(model = %inbound.model, stream = inbound.stream, user = %principal.user_id, "messages request");
    let stream = inbound.stream;
    let model = inbound.model.clone();
    let chat = to_chat_request(inbound);
    if let Err(err) = chat.validate() {
        return errors::anthropic_error(err);
    }

    let ctx = RequestContext::authenticated(
        principal.user_id.clone(),
        principal.role.clone(),
        principal.rate_limit,
    );

    if stream {
        let cancel = ctx.cancel.clone();
        match super::chat::spawn_chunk_stream(&state, chat, ctx).await {
            Ok(rx) => anthropic_sse_response(rx, cancel, model),
            Err(err) => errors::anthropic_error(err),
        }
    } else {
        match state.orchestrator.route_request(chat, &ctx).await {
            Ok(result) => HttpResponse::Ok().json(to_messages_response(&result.response)),
            Err(err) => errors::anthropic_error(err),
        }
    }
}

fn to_chat_request(inbound: MessagesRequest) -> ChatRequest {
    let mut request = ChatRequest::new(inbound.model);
    if let Some(system) = inbound.system {
        request.messages.push(system_message(system));
    }
    for message in inbound.messages {
        let role = match message.role.as_str() {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        };
        request
            .messages
            .push(crate::core::types::ChatMessage::text(
                role,
                message.content.into_text(),
            ));
    }
    request.max_tokens = Some(inbound.max_tokens);
    request.temperature = inbound.temperature;
    request
}

fn stop_reason(finish: Option<FinishReason>) -> &'static str {
    match finish {
        Some(FinishReason::Length) => "max_tokens",
        Some(FinishReason::ToolCalls) => "tool_use",
        _ => "end_turn",
    }
}

fn to_messages_response(response: &ChatResponse) -> MessagesResponse {
    let usage = response.usage.unwrap_or_default();
    MessagesResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![OutboundBlock {
            block_type: "text".to_string(),
            text: response.first_content().unwrap_or_default(),
        }],
        model: response.model.clone(),
        stop_reason: stop_reason(response.first_finish_reason()).to_string(),
        usage: OutboundUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}

/// Anthropic streaming event sequence over a chunk channel.
fn anthropic_sse_response(
    mut rx: tokio::sync::mpsc::Receiver<crate::core::error::Result<crate::core::types::ChatChunk>>,
    cancel: tokio_util::sync::CancellationToken,
    model: String,
) -> HttpResponse {
    let body = async_stream::stream! {
        let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        let start = json!({
            "type": "message_start",
            "message": {
                "id": message_id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": model,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            }
        });
        yield Ok::<_, std::convert::Infallible>(write_event(None, Some("message_start"), &start.to_string()));
        let block_start = json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "text", "text": ""},
        });
        yield Ok(write_event(None, Some("content_block_start"), &block_start.to_string()));

        let mut finish: Option<FinishReason> = None;
        let mut output_tokens = 0u32;

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Some(Ok(chunk)) => {
                    if let Some(usage) = chunk.usage {
                        output_tokens = usage.completion_tokens;
                    }
                    for choice in &chunk.choices {
                        if let Some(text) = &choice.delta.content {
                            let delta = json!({
                                "type": "content_block_delta",
                                "index": 0,
                                "delta": {"type": "text_delta", "text": text},
                            });
                            yield Ok(write_event(None, Some("content_block_delta"), &delta.to_string()));
                        }
                        if choice.finish_reason.is_some() {
                            finish = choice.finish_reason;
                        }
                    }
                    if chunk.is_terminal() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    let envelope = json!({
                        "type": "error",
                        "error": {"type": "api_error", "message": err.to_string()},
                    });
                    yield Ok(write_event(None, Some("error"), &envelope.to_string()));
                    return;
                }
                None => break,
            }
        }

        let block_stop = json!({"type": "content_block_stop", "index": 0});
        yield Ok(write_event(None, Some("content_block_stop"), &block_stop.to_string()));
        let message_delta = json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason(finish)},
            "usage": {"output_tokens": output_tokens},
        });
        yield Ok(write_event(None, Some("message_delta"), &message_delta.to_string()));
        let message_stop = json!({"type": "message_stop"});
        yield Ok(write_event(None, Some("message_stop"), &message_stop.to_string()));
    };

    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(body)
}
