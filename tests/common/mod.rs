//! Shared test fixtures: scriptable stub providers
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use modelmux::core::error::{GatewayError, Result};
use modelmux::core::providers::{ChunkSink, ProviderClient, ProviderDescriptor, ProviderKind};
use modelmux::core::types::{
    ChatChunk, ChatDelta, ChatRequest, ChatResponse, ChatStreamChoice, FinishReason, MessageRole,
    ModelInfo, RequestContext, Usage,
};

/// A scriptable in-memory provider
#[derive(Debug)]
pub struct StubProvider {
    descriptor: ProviderDescriptor,
    models: Vec<String>,
    reply: String,
    delay: Duration,
    usage: Usage,
    fail_status: Option<u16>,
    pub calls: AtomicU32,
}

impl StubProvider {
    pub fn new(name: &str, models: &[&str]) -> Self {
        Self {
            descriptor: ProviderDescriptor::new(name, ProviderKind::Compatible, "http://stub"),
            models: models.iter().map(|m| m.to_string()).collect(),
            reply: "stub reply".to_string(),
            delay: Duration::ZERO,
            usage: Usage::new(15, 15),
            fail_status: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_usage(mut self, prompt: u32, completion: u32) -> Self {
        self.usage = Usage::new(prompt, completion);
        self
    }

    /// Every chat call fails with the given upstream status.
    pub fn failing_with_status(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn response_for(&self, request: &ChatRequest) -> ChatResponse {
        let mut response = ChatResponse::assistant(request.model.clone(), self.reply.clone());
        response.usage = Some(self.usage);
        response
    }
}

#[async_trait]
impl ProviderClient for StubProvider {
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
        _ctx: &RequestContext,
    ) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.fail_status {
            return Err(GatewayError::from_status(
                self.name(),
                status,
                "stub failure",
            ));
        }
        tokio::time::sleep(self.delay).await;
        Ok(self.response_for(&request))
    }

    async fn stream(
        &self,
        request: ChatRequest,
        sink: ChunkSink,
        _ctx: &RequestContext,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.fail_status {
            let err = GatewayError::from_status(self.name(), status, "stub failure");
            let _ = sink.send(Err(err.clone())).await;
            return Err(err);
        }
        tokio::time::sleep(self.delay).await;

        // The reply splits into two deltas plus a terminal chunk so the
        // concatenation invariant is observable.
        let id = format!("stub-{}", self.name());
        let half = self.reply.len() / 2;
        let pieces = [&self.reply[..half], &self.reply[half..]];
        for piece in pieces {
            let chunk = ChatChunk {
                id: id.clone(),
                object: "chat.completion.chunk".to_string(),
                created: 0,
                model: request.model.clone(),
                choices: vec![ChatStreamChoice {
                    index: 0,
                    delta: ChatDelta {
                        role: Some(MessageRole::Assistant),
                        content: Some(piece.to_string()),
                        tool_calls: None,
                    },
                    finish_reason: None,
                }],
                usage: None,
            };
            if sink.send(Ok(chunk)).await.is_err() {
                return Ok(());
            }
        }
        let terminal = ChatChunk {
            id,
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: request.model.clone(),
            choices: vec![ChatStreamChoice {
                index: 0,
                delta: ChatDelta::default(),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(self.usage),
        };
        let _ = sink.send(Ok(terminal)).await;
        Ok(())
    }

    async fn health_probe(&self, _ctx: &RequestContext) -> Result<()> {
        if let Some(status) = self.fail_status {
            return Err(GatewayError::from_status(self.name(), status, "stub probe"));
        }
        Ok(())
    }

    async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<ModelInfo>> {
        Ok(self
            .models
            .iter()
            .map(|m| ModelInfo::new(m.clone(), self.name().to_string(), 8192))
            .collect())
    }
}
