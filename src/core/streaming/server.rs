//! Downstream SSE writer
//!
//! Serializes chat chunks into `id:` / `event:` / `data:` frames, emits
//! periodic heartbeat comments, and terminates with either the done marker
//! or client cancellation. Dropping the response body (client gone)
//! cancels the upstream read path through the shared cancellation handle;
//! no further downstream writes occur after that.

use std::time::Duration;

use actix_web::HttpResponse;
use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::{GatewayError, Result};
use crate::core::types::ChatChunk;

/// Downstream writer knobs
#[derive(Debug, Clone, Copy)]
pub struct SseWriterConfig {
    /// Interval between heartbeat comments
    pub heartbeat_interval: Duration,
    /// Bound on a stalled upstream before the stream is closed
    pub write_deadline: Duration,
}

impl Default for SseWriterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            write_deadline: Duration::from_secs(120),
        }
    }
}

/// Format one SSE event frame.
pub fn write_event(id: Option<&str>, event: Option<&str>, data: &str) -> Bytes {
    let mut frame = String::new();
    if let Some(id) = id {
        frame.push_str("id: ");
        frame.push_str(id);
        frame.push('\n');
    }
    if let Some(event) = event {
        frame.push_str("event: ");
        frame.push_str(event);
        frame.push('\n');
    }
    frame.push_str("data: ");
    frame.push_str(data);
    frame.push_str("\n\n");
    Bytes::from(frame)
}

/// Cancels the upstream scope when the response body is dropped.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Build a streaming `text/event-stream` response from a chunk channel.
///
/// Chunks preserve the order delivered by the upstream. A mid-stream error
/// becomes a terminal `event: error` frame followed by a clean close; the
/// normal end emits the OpenAI `[DONE]` marker.
pub fn sse_chat_response(
    mut rx: mpsc::Receiver<Result<ChatChunk>>,
    cancel: CancellationToken,
    config: SseWriterConfig,
) -> HttpResponse {
    let body = async_stream::stream! {
        let _guard = CancelOnDrop(cancel.clone());
        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.tick().await;
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("client cancelled, closing stream");
                    break;
                }
                _ = heartbeat.tick() => {
                    yield Ok::<_, std::convert::Infallible>(Bytes::from_static(b": heartbeat\n\n"));
                }
                received = tokio::time::timeout(config.write_deadline, rx.recv()) => {
                    match received {
                        Ok(Some(Ok(chunk))) => {
                            let terminal = chunk.is_terminal();
                            match serde_json::to_string(&chunk) {
                                Ok(json) => {
                                    next_id += 1;
                                    yield Ok(write_event(Some(&next_id.to_string()), None, &json));
                                }
                                Err(e) => {
                                    debug!(error = %e, "failed to serialize chunk");
                                }
                            }
                            if terminal {
                                yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
                                break;
                            }
                        }
                        Ok(Some(Err(err))) => {
                            // Terminal error event, then a clean close; no
                            // partial JSON frame is ever emitted.
                            let envelope = serde_json::json!({
                                "error": {
                                    "message": err.to_string(),
                                    "type": err.error_type(),
                                }
                            });
                            yield Ok(write_event(None, Some("error"), &envelope.to_string()));
                            break;
                        }
                        Ok(None) => {
                            yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
                            break;
                        }
                        Err(_) => {
                            let envelope = serde_json::json!({
                                "error": {
                                    "message": "upstream stalled past the write deadline",
                                    "type": GatewayError::timeout("upstream", "").error_type(),
                                }
                            });
                            yield Ok(write_event(None, Some("error"), &envelope.to_string()));
                            break;
                        }
                    }
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_frames_are_blank_line_terminated() {
        let frame = write_event(Some("7"), Some("message"), "{\"x\":1}");
        let text = std::str::from_utf8(&frame).unwrap();
        assert_eq!(text, "id: 7\nevent: message\ndata: {\"x\":1}\n\n");
    }

    #[test]
    fn data_only_frame() {
        let frame = write_event(None, None, "[DONE]");
        assert_eq!(std::str::from_utf8(&frame).unwrap(), "data: [DONE]\n\n");
    }
}
