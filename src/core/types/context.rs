//! Per-request execution context

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

/// Context threaded through every request-path call
///
/// Carries the identity yielded by the authentication gate and the scoped
/// cancellation handle. Every suspension point (HTTP calls, SSE reads,
/// timers, parallel joins) observes `cancel`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier
    pub request_id: String,
    /// Authenticated user, when the auth gate ran
    pub user_id: Option<String>,
    /// Role from the auth gate ("admin" gates administrative paths)
    pub role: Option<String>,
    /// Requests-per-minute budget from the auth gate
    pub rate_limit: Option<u32>,
    /// Scoped cancellation handle
    pub cancel: CancellationToken,
    /// Free-form metadata recorded into telemetry
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: format!("req-{}", uuid::Uuid::new_v4().simple()),
            user_id: None,
            role: None,
            rate_limit: None,
            cancel: CancellationToken::new(),
            metadata: HashMap::new(),
        }
    }

    /// Context for an authenticated principal.
    pub fn authenticated(
        user_id: impl Into<String>,
        role: impl Into<String>,
        rate_limit: Option<u32>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: Some(role.into()),
            rate_limit,
            ..Self::new()
        }
    }

    /// Child context sharing this request's identity with a cancellation
    /// scope nested under it. Cancelling the parent cancels the child.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            user_id: self.user_id.clone(),
            role: self.role.clone(),
            rate_limit: self.rate_limit,
            cancel: self.cancel.child_token(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_cancellation() {
        let parent = RequestContext::new();
        let child = parent.child();
        assert_eq!(child.request_id, parent.request_id);
        parent.cancel.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancel_does_not_cancel_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancel.cancel();
        assert!(!parent.is_cancelled());
    }
}
