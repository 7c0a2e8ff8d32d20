//! Authentication gate adapter
//!
//! Authentication itself is an external collaborator; the core only
//! consumes a check that yields `{user_id, role, rate_limit}` or
//! unauthorized. Implementations here cover static key tables and the
//! open gate used in tests and local development.

use std::collections::HashMap;

use actix_web::HttpRequest;
use async_trait::async_trait;

use crate::core::error::{GatewayError, Result};

/// Identity the gate yields for an authenticated request
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub user_id: String,
    pub role: String,
    /// Requests-per-minute budget enforced by the collaborator
    pub rate_limit: Option<u32>,
}

impl AuthPrincipal {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// The authentication check the core consumes
#[async_trait(?Send)]
pub trait AuthGate: Send + Sync {
    /// Authenticate a request or fail with an auth error (mapped to 401).
    async fn authenticate(&self, request: &HttpRequest) -> Result<AuthPrincipal>;
}

/// Bearer-token extraction shared by gate implementations.
pub fn bearer_token(request: &HttpRequest) -> Option<String> {
    request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// Static key table gate
pub struct StaticKeyAuth {
    keys: HashMap<String, AuthPrincipal>,
}

impl StaticKeyAuth {
    pub fn new(keys: HashMap<String, AuthPrincipal>) -> Self {
        Self { keys }
    }
}

#[async_trait(?Send)]
impl AuthGate for StaticKeyAuth {
    async fn authenticate(&self, request: &HttpRequest) -> Result<AuthPrincipal> {
        let token = bearer_token(request)
            .ok_or_else(|| GatewayError::auth("gateway", "missing bearer token"))?;
        self.keys
            .get(&token)
            .cloned()
            .ok_or_else(|| GatewayError::auth("gateway", "unknown api key"))
    }
}

/// Open gate: every request is an anonymous user
pub struct AllowAll;

#[async_trait(?Send)]
impl AuthGate for AllowAll {
    async fn authenticate(&self, _request: &HttpRequest) -> Result<AuthPrincipal> {
        Ok(AuthPrincipal {
            user_id: "anonymous".to_string(),
            role: "user".to_string(),
            rate_limit: None,
        })
    }
}
