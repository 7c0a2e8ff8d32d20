//! Upstream SSE subscriber
//!
//! Long-lived client for upstream event streams: sends the event-stream
//! accept headers and the last seen event id (`Last-Event-ID`) so the
//! upstream can resume, reconnects with exponential backoff on failure,
//! ignores comment lines, and dispatches completed events to per-type
//! handlers on detached tasks so the reader never blocks.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::{GatewayError, Result};
use crate::core::providers::sse::{SseEvent, SseParser};

/// Event type used when the upstream omits an `event:` field.
const DEFAULT_EVENT_TYPE: &str = "message";

/// Handler invoked per completed event
pub type EventHandler = Arc<dyn Fn(SseEvent) + Send + Sync>;

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SseClientConfig {
    pub url: String,
    /// Reconnect backoff starting point
    pub initial_backoff: Duration,
    /// Reconnect backoff cap
    pub max_backoff: Duration,
}

impl SseClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Upstream SSE subscriber with resume and reconnection
pub struct SseClient {
    config: SseClientConfig,
    http: Client,
    handlers: DashMap<String, EventHandler>,
    last_event_id: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl SseClient {
    pub fn new(config: SseClientConfig) -> Self {
        Self {
            config,
            http: Client::new(),
            handlers: DashMap::new(),
            last_event_id: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a handler for one event type.
    pub fn on<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(SseEvent) + Send + Sync + 'static,
    {
        self.handlers.insert(event_type.into(), Arc::new(handler));
    }

    /// Handle to stop the subscriber.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Last event id seen, echoed as `Last-Event-ID` on reconnect.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }

    /// Run the subscription until cancelled.
    ///
    /// Every connection failure or EOF schedules a reconnect with
    /// exponential backoff; a `retry:` field from the upstream overrides
    /// the next delay.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = self.config.initial_backoff;
        let mut retry_override: Option<Duration> = None;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.connect_once(&mut retry_override).await {
                Ok(()) => {
                    // Clean EOF: reconnect promptly.
                    backoff = self.config.initial_backoff;
                }
                Err(e) => {
                    warn!(url = %self.config.url, error = %e, "stream connection failed");
                }
            }

            let delay = retry_override.take().unwrap_or(backoff);
            backoff = (backoff * 2).min(self.config.max_backoff);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Spawn the subscription as a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn connect_once(&self, retry_override: &mut Option<Duration>) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(id) = self.last_event_id() {
            if let Ok(value) = HeaderValue::from_str(&id) {
                headers.insert("Last-Event-ID", value);
            }
        }

        let response = self
            .http
            .get(&self.config.url)
            .headers(headers)
            .send()
            .await
            .map_err(GatewayError::from)?;
        if !response.status().is_success() {
            return Err(GatewayError::from_status(
                "sse-upstream",
                response.status().as_u16(),
                "event stream connect failed",
            ));
        }
        debug!(url = %self.config.url, resume_from = ?self.last_event_id(), "event stream connected");

        let mut upstream = response.bytes_stream();
        let mut parser = SseParser::new();

        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                item = upstream.next() => item,
            };
            let events = match item {
                Some(Ok(bytes)) => parser.feed(&bytes),
                Some(Err(e)) => return Err(GatewayError::from(e)),
                None => {
                    if let Some(event) = parser.finish() {
                        self.dispatch(event, retry_override);
                    }
                    return Ok(());
                }
            };
            for event in events {
                self.dispatch(event, retry_override);
            }
        }
    }

    /// Track the event id, honor `retry:`, and hand the event to its
    /// handler on a detached task.
    fn dispatch(&self, event: SseEvent, retry_override: &mut Option<Duration>) {
        if let Some(id) = &event.id {
            *self.last_event_id.lock() = Some(id.clone());
        }
        if let Some(retry_ms) = event.retry {
            *retry_override = Some(Duration::from_millis(retry_ms).min(self.config.max_backoff));
        }
        if event.data.is_empty() {
            return;
        }

        let event_type = event
            .event
            .clone()
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());
        if let Some(handler) = self.handlers.get(&event_type) {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler(event);
            });
        }
    }
}

impl std::fmt::Debug for SseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseClient")
            .field("url", &self.config.url)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
