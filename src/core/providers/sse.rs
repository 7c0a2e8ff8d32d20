//! Server-Sent-Events decoding
//!
//! The SSE frame is a sum of events: comment, field (`id` | `event` |
//! `data` | `retry`), or blank. A stateful parser consumes frames and
//! emits a complete [`SseEvent`] at each blank line.

use std::collections::BTreeMap;

use crate::core::error::{GatewayError, Result};
use crate::core::types::{ChatChunk, FunctionCall, ToolCall, ToolCallDelta};

/// One parsed SSE line
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// Line starting with `:`; ignored by consumers
    Comment(String),
    /// `field: value` line
    Field(SseField),
    /// Empty line, terminates the pending event
    Blank,
}

/// Recognized SSE fields
#[derive(Debug, Clone, PartialEq)]
pub enum SseField {
    Id(String),
    Event(String),
    Data(String),
    Retry(u64),
}

impl SseFrame {
    /// Parse a single line (without its trailing newline).
    pub fn parse(line: &str) -> Option<Self> {
        if line.is_empty() {
            return Some(SseFrame::Blank);
        }
        if let Some(comment) = line.strip_prefix(':') {
            return Some(SseFrame::Comment(comment.trim_start().to_string()));
        }
        let (field, value) = match line.find(':') {
            Some(pos) => (&line[..pos], line[pos + 1..].trim_start()),
            // A field name with no colon carries an empty value
            None => (line, ""),
        };
        match field {
            "id" => Some(SseFrame::Field(SseField::Id(value.to_string()))),
            "event" => Some(SseFrame::Field(SseField::Event(value.to_string()))),
            "data" => Some(SseFrame::Field(SseField::Data(value.to_string()))),
            "retry" => value
                .parse::<u64>()
                .ok()
                .map(|ms| SseFrame::Field(SseField::Retry(ms))),
            _ => None,
        }
    }
}

/// A complete event, assembled between blank lines
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<u64>,
}

impl SseEvent {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_empty() && self.retry.is_none()
    }
}

/// Stateful SSE parser
///
/// Feed raw bytes as they arrive; complete events are returned as soon as
/// their terminating blank line is seen. Partial lines are buffered across
/// calls, so chunk boundaries in the transport never split an event.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending: SseEvent,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume raw bytes, returning every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        // Only complete lines are processed; the tail stays buffered.
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if let Some(event) = self.accept_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event at EOF when the upstream omitted the final
    /// blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = line.trim_end_matches('\r').to_string();
            self.accept_line(&line);
        }
        let event = std::mem::take(&mut self.pending);
        (!event.is_empty()).then_some(event)
    }

    fn accept_line(&mut self, line: &str) -> Option<SseEvent> {
        match SseFrame::parse(line)? {
            SseFrame::Blank => {
                let event = std::mem::take(&mut self.pending);
                (!event.is_empty()).then_some(event)
            }
            SseFrame::Comment(_) => None,
            SseFrame::Field(SseField::Id(id)) => {
                self.pending.id = Some(id);
                None
            }
            SseFrame::Field(SseField::Event(name)) => {
                self.pending.event = Some(name);
                None
            }
            SseFrame::Field(SseField::Data(data)) => {
                // Successive data lines concatenate with a newline
                if !self.pending.data.is_empty() {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(&data);
                None
            }
            SseFrame::Field(SseField::Retry(ms)) => {
                self.pending.retry = Some(ms);
                None
            }
        }
    }
}

/// End-of-stream marker for the OpenAI dialect
pub const DONE_MARKER: &str = "[DONE]";

/// Decode one OpenAI-dialect data payload into a chunk.
///
/// Returns `Ok(None)` for the `[DONE]` marker.
pub fn decode_openai_chunk(provider: &str, data: &str) -> Result<Option<ChatChunk>> {
    if data.trim() == DONE_MARKER {
        return Ok(None);
    }
    let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| {
        GatewayError::serialization(format!("{provider}: malformed stream chunk: {e}"))
    })?;
    Ok(Some(chunk))
}

/// Accumulates tool-call partials across chunks
///
/// Partials sharing an index belong to the same logical call; a complete
/// [`ToolCall`] per index is available at finish.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    tool_type: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one delta into the accumulated state.
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            entry.id = Some(id.clone());
        }
        if let Some(tool_type) = &delta.tool_type {
            entry.tool_type = Some(tool_type.clone());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                entry.name = Some(name.clone());
            }
            if let Some(arguments) = &function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Complete tool calls in index order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|partial| ToolCall {
                id: partial.id.unwrap_or_default(),
                tool_type: partial.tool_type.unwrap_or_else(|| "function".to_string()),
                function: FunctionCall {
                    name: partial.name.unwrap_or_default(),
                    arguments: partial.arguments,
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FunctionCallDelta;

    #[test]
    fn frame_parsing() {
        assert_eq!(SseFrame::parse(""), Some(SseFrame::Blank));
        assert_eq!(
            SseFrame::parse(": keep-alive"),
            Some(SseFrame::Comment("keep-alive".to_string()))
        );
        assert_eq!(
            SseFrame::parse("id: 42"),
            Some(SseFrame::Field(SseField::Id("42".to_string())))
        );
        assert_eq!(
            SseFrame::parse("retry: 5000"),
            Some(SseFrame::Field(SseField::Retry(5000)))
        );
        assert_eq!(SseFrame::parse("unknown: x"), None);
    }

    #[test]
    fn parser_emits_event_on_blank_line() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"id: 7\nevent: message\ndata: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn parser_buffers_split_lines() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: par").is_empty());
        assert!(parser.feed(b"tial\n").is_empty());
        let events = parser.feed(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn multiline_data_joined_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: line one\ndata: line two\n\n");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn comments_are_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": heartbeat\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn crlf_lines_accepted() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: hi\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn done_marker_decodes_to_none() {
        assert!(decode_openai_chunk("p", "[DONE]").unwrap().is_none());
    }

    #[test]
    fn malformed_chunk_is_a_serialization_error() {
        let err = decode_openai_chunk("p", "{not json").unwrap_err();
        assert!(matches!(err, GatewayError::Serialization { .. }));
    }

    #[test]
    fn tool_calls_accumulate_by_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&ToolCallDelta {
            index: 0,
            id: Some("call_1".to_string()),
            tool_type: Some("function".to_string()),
            function: Some(FunctionCallDelta {
                name: Some("get_weather".to_string()),
                arguments: Some("{\"city\":".to_string()),
            }),
        });
        acc.push(&ToolCallDelta {
            index: 0,
            id: None,
            tool_type: None,
            function: Some(FunctionCallDelta {
                name: None,
                arguments: Some("\"Rome\"}".to_string()),
            }),
        });

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"Rome\"}");
    }
}
