//! Request correlation ids
//!
//! A valid incoming `X-Request-ID` is reused, anything else is replaced
//! with a fresh UUIDv4. The id is echoed on the response, stored in the
//! request extensions for the trace span, and kept in a task-local
//! [`RequestContext`] so error bodies built deeper in the stack can carry it.

use std::future::Future;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 128;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Per-request state visible to everything running inside the request task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    /// Return internal error messages verbatim (non-production only)
    pub expose_internal_errors: bool,
}

/// Request id as stored in the request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Middleware state
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdConfig {
    pub expose_internal_errors: bool,
}

/// Context of the request being handled by the current task, if any
pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Run `fut` with `context` as the current request context
pub async fn scope<F: Future>(context: RequestContext, fut: F) -> F::Output {
    REQUEST_CONTEXT.scope(context, fut).await
}

/// Up to 128 visible ASCII characters
pub fn is_valid_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value.bytes().all(|b| b.is_ascii_graphic())
}

/// Assign, propagate and echo the request id
pub async fn request_id(
    State(config): State<RequestIdConfig>,
    mut request: Request,
    next: Next,
) -> Response {
    let id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| is_valid_request_id(value))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));

    let context = RequestContext {
        request_id: id.clone(),
        expose_internal_errors: config.expose_internal_errors,
    };
    let mut response = scope(context, next.run(request)).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|| async { current().map(|ctx| ctx.request_id).unwrap_or_default() }),
            )
            .layer(axum::middleware::from_fn_with_state(
                RequestIdConfig::default(),
                request_id,
            ))
    }

    async fn call(header: Option<&str>) -> (String, String) {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header("x-request-id", value);
        }
        let response = app().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let echoed = response
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (echoed, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_is_valid_request_id() {
        assert!(is_valid_request_id("abc-123"));
        assert!(is_valid_request_id(&"x".repeat(128)));
        assert!(!is_valid_request_id(""));
        assert!(!is_valid_request_id(&"x".repeat(129)));
        assert!(!is_valid_request_id("has space"));
    }

    #[tokio::test]
    async fn test_incoming_id_is_reused() {
        let (echoed, seen_by_handler) = call(Some("trace-42")).await;
        assert_eq!(echoed, "trace-42");
        assert_eq!(seen_by_handler, "trace-42");
    }

    #[tokio::test]
    async fn test_missing_or_invalid_id_is_generated() {
        let (echoed, seen_by_handler) = call(None).await;
        assert!(Uuid::parse_str(&echoed).is_ok());
        assert_eq!(echoed, seen_by_handler);

        let (echoed, _) = call(Some(&"y".repeat(200))).await;
        assert!(Uuid::parse_str(&echoed).is_ok());
    }

    #[tokio::test]
    async fn test_no_context_outside_scope() {
        assert!(current().is_none());
    }
}
