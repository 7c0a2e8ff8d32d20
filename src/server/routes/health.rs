//! Liveness endpoint

use actix_web::{HttpResponse, web};
use serde_json::json;

use crate::server::state::AppState;

/// `GET /health`: gateway liveness plus a provider health summary.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.registry.stats();
    let providers: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .filter_map(|name| {
            state.registry.state_of(&name).map(|s| {
                json!({
                    "name": name,
                    "status": s.status,
                    "health": s.health,
                    "avg_latency_ms": s.avg_latency_ms,
                    "last_probe": s.last_probe,
                })
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": stats,
        "providers": providers,
    }))
}
