//! Bidirectional SSE adapter
//!
//! The client side subscribes to upstream event streams with resume and
//! reconnection; the server side writes the downstream event stream with
//! heartbeats and cancellation.

pub mod client;
pub mod server;

pub use client::{SseClient, SseClientConfig};
pub use server::{SseWriterConfig, sse_chat_response, write_event};
