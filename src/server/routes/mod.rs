//! HTTP routes
//!
//! The wire surface: OpenAI-style chat completions, Anthropic-style
//! messages, the model listing, and liveness.

pub mod chat;
pub mod errors;
pub mod health;
pub mod messages;
pub mod models;

use actix_web::web;

/// Register every route on the app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/v1/chat/completions",
        web::post().to(chat::chat_completions),
    )
    .route("/v1/messages", web::post().to(messages::messages))
    .route("/v1/models", web::get().to(models::list_models))
    .route("/health", web::get().to(health::health));
}
