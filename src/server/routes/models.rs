//! Model listing endpoint

use actix_web::{HttpRequest, HttpResponse, web};
use serde::Serialize;

use super::errors;
use crate::core::types::RequestContext;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
struct ModelListing {
    object: &'static str,
    data: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    created: i64,
    owned_by: String,
}

/// `GET /v1/models`: every model exposed by the active providers.
pub async fn list_models(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if let Err(err) = state.auth.authenticate(&req).await {
        return errors::openai_error(err);
    }

    let ctx = RequestContext::new();
    let created = chrono::Utc::now().timestamp();
    let mut entries = Vec::new();

    for provider in state.registry.eligible_providers() {
        match provider.list_models(&ctx).await {
            Ok(models) => {
                for model in models {
                    entries.push(ModelEntry {
                        id: model.id,
                        object: "model",
                        created,
                        owned_by: provider.name().to_string(),
                    });
                }
            }
            Err(err) => {
                tracing::debug!(provider = %provider.name(), error = %err, "model listing failed");
            }
        }
    }
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries.dedup_by(|a, b| a.id == b.id);

    HttpResponse::Ok().json(ModelListing {
        object: "list",
        data: entries,
    })
}
