//! OpenAI-compatible provider client
//!
//! Speaks the OpenAI chat-completions wire protocol over HTTP with SSE
//! streaming. Commercial APIs, local inference servers, and third-party
//! compatibles all go through this client; only the descriptor differs.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use tracing::debug;

use super::retry::RetryPolicy;
use super::sse::{SseParser, ToolCallAccumulator, decode_openai_chunk};
use super::{ChunkSink, ProviderClient, ProviderDescriptor, ProviderKind};
use crate::core::error::{GatewayError, Result};
use crate::core::types::{
    ChatChunk, ChatRequest, ChatResponse, FinishReason, FunctionCallDelta, ModelInfo,
    RequestContext, ToolCallDelta,
};

/// Context window assumed for models an upstream lists without metadata.
const DEFAULT_CONTEXT_WINDOW: u32 = 8192;

/// OpenAI-compatible HTTP client
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    descriptor: ProviderDescriptor,
    api_key: Option<String>,
    http: Client,
    retry: RetryPolicy,
}

impl OpenAiCompatClient {
    /// Build a client from its descriptor and resolved credential.
    pub fn new(descriptor: ProviderDescriptor, api_key: Option<String>) -> Result<Self> {
        let http = ClientBuilder::new()
            .timeout(Duration::from_secs(descriptor.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                GatewayError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        let retry = RetryPolicy::new(descriptor.max_retries);
        Ok(Self {
            descriptor,
            api_key,
            http,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.descriptor.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request_builder(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(self.url(path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Read an error response body and map it to the error taxonomy.
    async fn map_error_response(&self, response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let message = extract_error_message(&body).unwrap_or(body);

        match status {
            429 => GatewayError::rate_limit(&self.descriptor.name, retry_after),
            _ => GatewayError::from_status(&self.descriptor.name, status, &message),
        }
    }

    async fn send_chat(&self, body: &serde_json::Value) -> Result<ChatResponse> {
        let response = self
            .request_builder("chat/completions")
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::serialization(format!(
                "{}: malformed chat response: {e}",
                self.descriptor.name
            ))
        })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::timeout(&self.descriptor.name, err.to_string())
        } else {
            GatewayError::network(&self.descriptor.name, err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn kind(&self) -> ProviderKind {
        self.descriptor.kind
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn chat_completion(
        &self,
        request: ChatRequest,
        ctx: &RequestContext,
    ) -> Result<ChatResponse> {
        let mut body = serde_json::to_value(&request)?;
        body["stream"] = serde_json::Value::Bool(false);

        debug!(provider = %self.descriptor.name, model = %request.model, "chat completion");
        self.retry
            .execute(&self.descriptor.name, ctx, || self.send_chat(&body))
            .await
    }

    async fn stream(
        &self,
        request: ChatRequest,
        sink: ChunkSink,
        ctx: &RequestContext,
    ) -> Result<()> {
        let mut body = serde_json::to_value(&request)?;
        body["stream"] = serde_json::Value::Bool(true);

        let response = self
            .request_builder("chat/completions")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        let mut upstream = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut tool_calls = ToolCallAccumulator::new();
        let mut eof = false;

        loop {
            if eof {
                return Ok(());
            }

            let item = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(GatewayError::Cancelled),
                item = upstream.next() => item,
            };

            let events = match item {
                Some(Ok(bytes)) => parser.feed(&bytes),
                Some(Err(e)) => {
                    // Mid-stream transport failure: surface through the sink
                    // so the downstream writer can emit a terminal error.
                    let err = self.map_transport_error(e);
                    let _ = sink.send(Err(err.clone())).await;
                    return Err(err);
                }
                None => {
                    // EOF without a [DONE] marker still flushes a buffered
                    // trailing event.
                    eof = true;
                    parser.finish().into_iter().collect()
                }
            };

            for event in events {
                if event.data.is_empty() {
                    continue;
                }
                match decode_openai_chunk(&self.descriptor.name, &event.data) {
                    Ok(Some(mut chunk)) => {
                        accumulate_tool_calls(&mut tool_calls, &chunk);
                        let terminal = chunk.is_terminal();
                        if terminal {
                            attach_complete_tool_calls(&mut tool_calls, &mut chunk);
                        }
                        if sink.send(Ok(chunk)).await.is_err() {
                            // Receiver dropped: the client went away.
                            return Ok(());
                        }
                        if terminal {
                            return Ok(());
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(err) => {
                        let _ = sink.send(Err(err.clone())).await;
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn health_probe(&self, _ctx: &RequestContext) -> Result<()> {
        let mut builder = self.http.get(self.url("models"));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.map_error_response(response).await)
        }
    }

    async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<ModelInfo>> {
        let mut builder = self.http.get(self.url("models"));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        let listing: ModelListing = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        Ok(listing
            .data
            .into_iter()
            .map(|m| {
                let mut info =
                    ModelInfo::new(m.id, self.descriptor.name.clone(), DEFAULT_CONTEXT_WINDOW);
                info.capabilities = self.descriptor.capabilities.clone();
                info.pricing = self.descriptor.cost;
                info
            })
            .collect())
    }
}

fn accumulate_tool_calls(acc: &mut ToolCallAccumulator, chunk: &ChatChunk) {
    for choice in &chunk.choices {
        if let Some(deltas) = &choice.delta.tool_calls {
            for delta in deltas {
                acc.push(delta);
            }
        }
    }
}

/// At finish, replace the terminal chunk's partial tool calls with the
/// complete accumulated set so downstream consumers see whole calls.
fn attach_complete_tool_calls(acc: &mut ToolCallAccumulator, chunk: &mut ChatChunk) {
    if acc.is_empty() {
        return;
    }
    let complete = std::mem::take(acc).finish();
    if let Some(choice) = chunk
        .choices
        .iter_mut()
        .find(|c| c.finish_reason == Some(FinishReason::ToolCalls))
    {
        choice.delta.tool_calls = Some(
            complete
                .into_iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index: index as u32,
                    id: Some(call.id),
                    tool_type: Some(call.tool_type),
                    function: Some(FunctionCallDelta {
                        name: Some(call.function.name),
                        arguments: Some(call.function.arguments),
                    }),
                })
                .collect(),
        );
    }
}

#[derive(Debug, Deserialize)]
struct ModelListing {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Pull a human-readable message out of a JSON error body.
fn extract_error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| json.get("message").and_then(|m| m.as_str()))
        .or_else(|| json.get("error").and_then(|e| e.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_extraction() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"bad key"}}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            extract_error_message(r#"{"message":"oops"}"#).as_deref(),
            Some("oops")
        );
        assert_eq!(extract_error_message("not json"), None);
    }

    #[test]
    fn url_joining_handles_slashes() {
        let descriptor = ProviderDescriptor::new(
            "test",
            ProviderKind::Compatible,
            "http://localhost:8000/v1/",
        );
        let client = OpenAiCompatClient::new(descriptor, None).unwrap();
        assert_eq!(
            client.url("/chat/completions"),
            "http://localhost:8000/v1/chat/completions"
        );
    }
}
