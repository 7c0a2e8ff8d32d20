//! Error envelopes per wire dialect

use actix_web::HttpResponse;
use serde_json::json;

use crate::core::error::GatewayError;

/// OpenAI-style envelope: `{"error": {"message", "type", "code"?}}`.
pub fn openai_error(err: GatewayError) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(err.http_status())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "error": {
            "message": err.to_string(),
            "type": err.error_type(),
            "code": err.http_status(),
        }
    });
    HttpResponse::build(status).json(body)
}

/// Anthropic-style envelope: `{"type": "error", "error": {"type", "message"}}`.
pub fn anthropic_error(err: GatewayError) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(err.http_status())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    let error_type = match &err {
        GatewayError::Auth { .. } => "authentication_error",
        GatewayError::InvalidRequest { .. } => "invalid_request_error",
        GatewayError::ModelNotFound { .. } => "not_found_error",
        GatewayError::RateLimit { .. } => "rate_limit_error",
        GatewayError::Timeout { .. } => "timeout_error",
        _ => "api_error",
    };
    let body = json!({
        "type": "error",
        "error": {
            "type": error_type,
            "message": err.to_string(),
        }
    });
    HttpResponse::build(status).json(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_envelope_status_matches_taxonomy() {
        let response = openai_error(GatewayError::invalid_request("bad"));
        assert_eq!(response.status().as_u16(), 400);

        let response = openai_error(GatewayError::auth("gateway", "no"));
        assert_eq!(response.status().as_u16(), 401);
    }

    #[test]
    fn anthropic_envelope_status_matches_taxonomy() {
        let response = anthropic_error(GatewayError::rate_limit("p", None));
        assert_eq!(response.status().as_u16(), 429);
    }
}
