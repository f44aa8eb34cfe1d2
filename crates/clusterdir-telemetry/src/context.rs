//! Per-request context and tracing span.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::field;
use uuid::Uuid;

/// Correlation data for one API request.
///
/// The span carries `request_id`, `method` and `route` from the start;
/// `principal` and `status` are recorded once authorization has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique request identifier.
    pub request_id: Uuid,
    /// HTTP method.
    pub method: String,
    /// Request path as received.
    pub route: String,
    /// When the request started.
    pub started_at: DateTime<Utc>,
}

impl RequestContext {
    /// Context for a new request with a fresh id.
    #[must_use]
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: method.into(),
            route: route.into(),
            started_at: Utc::now(),
        }
    }

    /// Reuse a caller-supplied request id (e.g. `X-Request-Id`) when it parses.
    #[must_use]
    pub fn with_request_id_header(mut self, header: Option<&str>) -> Self {
        if let Some(id) = header.and_then(|h| Uuid::parse_str(h.trim()).ok()) {
            self.request_id = id;
        }
        self
    }

    /// Time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed().num_milliseconds()
    }

    /// A span carrying this context.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            method = %self.method,
            route = %self.route,
            principal = field::Empty,
            status = field::Empty,
        )
    }

    /// First eight characters of the request id.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.request_id.simple().to_string().chars().take(8).collect()
    }
}

/// Keeps the request span entered and logs completion on drop.
pub struct RequestGuard {
    context: RequestContext,
    span: tracing::span::EnteredSpan,
}

impl RequestGuard {
    /// Enter the context's span.
    #[must_use]
    pub fn new(context: RequestContext) -> Self {
        let span = context.span().entered();
        tracing::debug!("request started");
        Self { context, span }
    }

    /// The request context.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Record the authenticated principal on the span.
    pub fn record_principal(&self, principal: &str) {
        self.span.record("principal", principal);
    }

    /// Record the response status on the span.
    pub fn record_status(&self, status: u16) {
        self.span.record("status", status);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        tracing::debug!(elapsed_ms = self.context.elapsed_ms(), "request completed");
    }
}

impl std::fmt::Debug for RequestGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGuard")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_creation() {
        let ctx = RequestContext::new("POST", "/api/clusters");
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.route, "/api/clusters");
        assert_ne!(ctx.request_id, RequestContext::new("POST", "/").request_id);
    }

    #[test]
    fn test_request_id_header() {
        let id = Uuid::new_v4();
        let ctx = RequestContext::new("GET", "/").with_request_id_header(Some(&id.to_string()));
        assert_eq!(ctx.request_id, id);

        let ctx = RequestContext::new("GET", "/").with_request_id_header(Some("not-a-uuid"));
        assert_ne!(ctx.request_id, id);
    }

    #[test]
    fn test_short_id() {
        let ctx = RequestContext::new("GET", "/");
        assert_eq!(ctx.short_id().len(), 8);
    }

    #[test]
    fn test_elapsed() {
        let ctx = RequestContext::new("GET", "/");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(ctx.elapsed_ms() >= 10);
    }

    #[test]
    fn test_guard_records_without_subscriber() {
        let guard = RequestGuard::new(RequestContext::new("GET", "/api/clusters"));
        guard.record_principal("did:key:zABC");
        guard.record_status(200);
        assert_eq!(guard.context().method, "GET");
    }

    #[test]
    fn test_serialization() {
        let ctx = RequestContext::new("DELETE", "/api/nodes/1");
        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"method\":\"DELETE\""));

        let parsed: RequestContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, ctx.request_id);
    }
}
