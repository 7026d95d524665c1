//! axum integration.
//!
//! - [`RaisedError`] implements `IntoResponse`, so handlers can return
//!   `Result<T, RaisedError>` and use `?`
//! - [`error_boundary`] is the terminal middleware: it captures the request
//!   context, runs the inner service and, when the response carries a
//!   `RaisedError`, replaces it with the policy's answer
//! - [`route_not_found`] is the router fallback
//!
//! ```rust,ignore
//! let boundary = ErrorBoundary::from_config(&PolicyConfig::from_env());
//! let app = boundary.apply(Router::new().route("/api/posts", get(list_posts)));
//! ```
//!
//! Without the boundary a returned `RaisedError` still renders as a bare
//! production-style 500, never as the raw message.

use crate::{
    ErrorResponsePolicy, INTERNAL_ERROR_MESSAGE, PolicyConfig, RaisedError, RequestContext,
    ResponseEnvelope,
};
use axum::Json;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::sync::Arc;

/// Authenticated caller, inserted into request or response extensions by the
/// auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Status and envelope produced by the policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyResponse {
    /// Response status.
    pub status: StatusCode,
    /// JSON body.
    pub envelope: ResponseEnvelope,
}

impl From<(StatusCode, ResponseEnvelope)> for PolicyResponse {
    fn from((status, envelope): (StatusCode, ResponseEnvelope)) -> Self {
        Self { status, envelope }
    }
}

impl IntoResponse for PolicyResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.envelope)).into_response()
    }
}

impl IntoResponse for RaisedError {
    fn into_response(self) -> Response {
        let mut resp = PolicyResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            envelope: ResponseEnvelope::message_only(INTERNAL_ERROR_MESSAGE),
        }
        .into_response();
        resp.extensions_mut().insert(self);
        resp
    }
}

impl From<JsonRejection> for RaisedError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        RaisedError::validation(json!([{ "message": text }])).with_message(text)
    }
}

// ============================================================================
// Boundary
// ============================================================================

/// State shared by [`error_boundary`].
#[derive(Debug, Clone)]
pub struct ErrorBoundary {
    policy: ErrorResponsePolicy,
    body_limit_bytes: usize,
}

impl ErrorBoundary {
    /// Boundary answering through `policy`, capturing JSON bodies up to
    /// `body_limit_bytes`.
    pub fn new(policy: ErrorResponsePolicy, body_limit_bytes: usize) -> Self {
        Self {
            policy,
            body_limit_bytes,
        }
    }

    /// Boundary with the policy and body limit described by `cfg`.
    pub fn from_config(cfg: &PolicyConfig) -> Self {
        Self::new(cfg.build_policy(cfg.recent_buffer()), cfg.body_limit_bytes)
    }

    /// Policy used to answer failed requests.
    #[inline]
    pub fn policy(&self) -> &ErrorResponsePolicy {
        &self.policy
    }

    /// Install the fallback and the boundary middleware on `router`.
    pub fn apply(self, router: Router) -> Router {
        router
            .fallback(route_not_found)
            .layer(middleware::from_fn_with_state(Arc::new(self), error_boundary))
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.contains("+json"))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Terminal error middleware. Use via [`ErrorBoundary::apply`] or
/// `middleware::from_fn_with_state(Arc<ErrorBoundary>, error_boundary)`.
pub async fn error_boundary(
    State(boundary): State<Arc<ErrorBoundary>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_owned();
    let request_user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.clone());

    let (parts, body) = request.into_parts();
    let (captured, body) = if !is_json(&parts.headers) {
        (Value::Null, body)
    } else {
        match declared_length(&parts.headers) {
            Some(len) if len <= boundary.body_limit_bytes => {
                match to_bytes(body, len).await {
                    Ok(bytes) => {
                        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                        (value, Body::from(bytes))
                    }
                    Err(_) => {
                        // Body is consumed; the request cannot continue.
                        let err = RaisedError::http(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            "request body exceeds its declared length",
                        );
                        let ctx = RequestContext::builder(method, path)
                            .maybe_user_id(request_user)
                            .build();
                        return PolicyResponse::from(boundary.policy.handle(&err, &ctx))
                            .into_response();
                    }
                }
            }
            Some(len) => (json!({ "omitted_bytes": len }), body),
            None => (Value::Null, body),
        }
    };

    let mut response = next.run(Request::from_parts(parts, body)).await;

    let Some(err) = response.extensions_mut().remove::<RaisedError>() else {
        return response;
    };

    let user_id = request_user.or_else(|| {
        response
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|u| u.0.clone())
    });
    let ctx = RequestContext::builder(method, path)
        .body(captured)
        .maybe_user_id(user_id)
        .build();

    PolicyResponse::from(boundary.policy.handle(&err, &ctx)).into_response()
}

/// Router fallback for unmatched routes.
pub async fn route_not_found(method: Method, uri: Uri) -> PolicyResponse {
    crate::not_found(method.as_str(), uri.path()).into()
}
