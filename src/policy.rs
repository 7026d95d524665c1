//! The terminal error-response policy.
//!
//! [`ErrorResponsePolicy::handle`] is the last stop for every failed request:
//!
//! 1. write one [`DiagnosticRecord`] to the sink, whatever the mode
//! 2. map the fault's [`ErrorKind`] to a status and message
//! 3. attach diagnostic extras, which the envelope gate drops in production
//!
//! | Kind                       | Status     | Production message               | Non-production message           | Extras (non-production) |
//! |----------------------------|------------|----------------------------------|----------------------------------|-------------------------|
//! | `CorsViolation`            | 403        | `Access forbidden`               | original message                 | none                    |
//! | `UniqueConstraintConflict` | 409        | `Resource conflict`              | `Resource already exists`        | `field`                 |
//! | `RecordNotFound`           | 404        | `Resource not found`             | same                             | none                    |
//! | `ValidationFailure`        | 400        | `Invalid request data`           | `Validation failed`              | `errors`                |
//! | `AuthTokenInvalid`         | 401        | `Invalid authentication token`   | same                             | none                    |
//! | `AuthTokenExpired`         | 401        | `Authentication token expired`   | same                             | none                    |
//! | `Generic`                  | suggested, else 500 | `Internal server error` at >= 500, else message | message          | `stack`, `details`      |
//!
//! The handler never fails and never retries. A sink that errors or panics
//! is ignored and the response is still produced.

use crate::{
    DiagnosticExtras, DiagnosticRecord, DiagnosticSink, EMPTY_MESSAGE_FALLBACK, ErrorKind,
    RaisedError, RequestContext, ResponseEnvelope, RuntimeMode, SinkError,
};
use http::StatusCode;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Production message for server-side faults.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Response policy with its mode fixed at construction.
#[derive(Clone)]
pub struct ErrorResponsePolicy {
    mode: RuntimeMode,
    sink: Arc<dyn DiagnosticSink>,
}

impl ErrorResponsePolicy {
    /// Policy for `mode` writing diagnostics to `sink`.
    pub fn new(mode: RuntimeMode, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { mode, sink }
    }

    /// Policy writing diagnostics through `tracing`.
    pub fn with_tracing(mode: RuntimeMode) -> Self {
        Self::new(mode, Arc::new(crate::TracingSink))
    }

    /// Mode fixed at construction.
    #[inline]
    pub const fn mode(&self) -> RuntimeMode {
        self.mode
    }

    /// Log `err` in full and build the caller-facing status and envelope.
    pub fn handle(
        &self,
        err: &RaisedError,
        ctx: &RequestContext,
    ) -> (StatusCode, ResponseEnvelope) {
        // Logging outcome never affects the response.
        let _ = self.write_diagnostic(err, ctx);
        self.respond(err)
    }

    /// Build the response for `err` without logging. Pure.
    pub fn respond(&self, err: &RaisedError) -> (StatusCode, ResponseEnvelope) {
        let status = err.status();
        let production = self.mode.is_production();
        let mut extras = DiagnosticExtras::default();

        let message: Cow<'_, str> = match err.kind() {
            ErrorKind::CorsViolation => {
                if production {
                    Cow::Borrowed("Access forbidden")
                } else {
                    Cow::Borrowed(err.message())
                }
            }
            ErrorKind::UniqueConstraintConflict => {
                extras.field = err.conflicting_field().map(str::to_owned);
                if production {
                    Cow::Borrowed("Resource conflict")
                } else {
                    Cow::Borrowed("Resource already exists")
                }
            }
            ErrorKind::RecordNotFound => Cow::Borrowed("Resource not found"),
            ErrorKind::ValidationFailure => {
                extras.errors = err.validation_details().cloned();
                if production {
                    Cow::Borrowed("Invalid request data")
                } else {
                    Cow::Borrowed("Validation failed")
                }
            }
            ErrorKind::AuthTokenInvalid => Cow::Borrowed("Invalid authentication token"),
            ErrorKind::AuthTokenExpired => Cow::Borrowed("Authentication token expired"),
            ErrorKind::Generic => {
                extras.stack = err.stack().map(str::to_owned);
                extras.details = err.metadata().cloned().map(Value::Object);
                if production && status.as_u16() >= 500 {
                    Cow::Borrowed(INTERNAL_ERROR_MESSAGE)
                } else if err.message().is_empty() {
                    Cow::Borrowed(EMPTY_MESSAGE_FALLBACK)
                } else {
                    Cow::Borrowed(err.message())
                }
            }
        };

        (status, ResponseEnvelope::sanitized(message, extras, self.mode))
    }

    /// Write exactly one record to the sink, absorbing panics.
    fn write_diagnostic(&self, err: &RaisedError, ctx: &RequestContext) -> Result<(), SinkError> {
        let record = DiagnosticRecord::capture(err, ctx);
        match catch_unwind(AssertUnwindSafe(|| self.sink.record(&record))) {
            Ok(result) => result,
            Err(_) => Err(SinkError::Panicked),
        }
    }
}

impl fmt::Debug for ErrorResponsePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorResponsePolicy")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Answer for a request that matched no route.
pub fn not_found(method: &str, path: &str) -> (StatusCode, ResponseEnvelope) {
    (
        StatusCode::NOT_FOUND,
        ResponseEnvelope::message_only(format!("Route {method} {path} not found")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RingBufferSink;
    use serde_json::json;

    fn policy(mode: RuntimeMode) -> (ErrorResponsePolicy, RingBufferSink) {
        let sink = RingBufferSink::new(64, 4096);
        (ErrorResponsePolicy::new(mode, Arc::new(sink.clone())), sink)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("POST", "/api/users")
    }

    fn as_json(envelope: &ResponseEnvelope) -> Value {
        serde_json::to_value(envelope).unwrap()
    }

    #[test]
    fn cors_scenario() {
        let err = RaisedError::new("CORS policy violation from https://evil.example");

        let (status, env) = policy(RuntimeMode::Production).0.handle(&err, &ctx());
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(as_json(&env), json!({ "success": false, "message": "Access forbidden" }));

        let (status, env) = policy(RuntimeMode::Development).0.handle(&err, &ctx());
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(env.message(), "CORS policy violation from https://evil.example");
        assert!(!env.has_diagnostics());
    }

    #[test]
    fn generic_500_mentioning_cors_is_still_cors() {
        let err = RaisedError::new("upstream CORS preflight cache exploded").with_status(500);
        let (status, env) = policy(RuntimeMode::Production).0.handle(&err, &ctx());
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(env.message(), "Access forbidden");
    }

    #[test]
    fn unique_constraint_scenario() {
        let err = RaisedError::new("dup").with_code("P2002").with_meta("target", json!(["email"]));

        let (status, env) = policy(RuntimeMode::Development).0.handle(&err, &ctx());
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            as_json(&env),
            json!({ "success": false, "message": "Resource already exists", "field": "email" })
        );

        let (status, env) = policy(RuntimeMode::Production).0.handle(&err, &ctx());
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(as_json(&env), json!({ "success": false, "message": "Resource conflict" }));
    }

    #[test]
    fn unique_constraint_without_target_omits_field() {
        let err = RaisedError::new("dup").with_code("P2002");
        let (_, env) = policy(RuntimeMode::Development).0.handle(&err, &ctx());
        assert_eq!(env.field(), None);
    }

    #[test]
    fn record_not_found_same_in_both_modes() {
        for mode in [RuntimeMode::Production, RuntimeMode::Development] {
            let err = RaisedError::record_not_found("no row");
            let (status, env) = policy(mode).0.handle(&err, &ctx());
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(env.message(), "Resource not found");
            assert!(!env.has_diagnostics());
        }
    }

    #[test]
    fn validation_errors_only_outside_production() {
        let details = json!([{ "field": "email", "message": "must be an email" }]);
        let err = RaisedError::validation(details.clone());

        let (status, env) = policy(RuntimeMode::Development).0.handle(&err, &ctx());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(env.message(), "Validation failed");
        assert_eq!(env.errors(), Some(&details));

        let (status, env) = policy(RuntimeMode::Production).0.handle(&err, &ctx());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(as_json(&env), json!({ "success": false, "message": "Invalid request data" }));
    }

    #[test]
    fn token_kinds_do_not_depend_on_mode() {
        for mode in [RuntimeMode::Production, RuntimeMode::Development] {
            let (p, _) = policy(mode);

            let (status, env) = p.handle(&RaisedError::expired_token(), &ctx());
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(env.message(), "Authentication token expired");

            let (status, env) = p.handle(&RaisedError::invalid_token("invalid signature"), &ctx());
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(env.message(), "Invalid authentication token");
        }
    }

    #[test]
    fn generic_server_error_is_masked_in_production() {
        let err = RaisedError::new("connection refused: db-primary:5432")
            .with_stack("at connect (pool.rs:88)")
            .with_meta("host", json!("db-primary"));

        let (status, env) = policy(RuntimeMode::Production).0.handle(&err, &ctx());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(as_json(&env), json!({ "success": false, "message": "Internal server error" }));

        let (_, env) = policy(RuntimeMode::Development).0.handle(&err, &ctx());
        assert_eq!(env.message(), "connection refused: db-primary:5432");
        assert_eq!(env.stack(), Some("at connect (pool.rs:88)"));
        assert_eq!(env.details(), Some(&json!({ "host": "db-primary" })));
    }

    #[test]
    fn every_status_from_500_up_is_masked_in_production() {
        let (p, _) = policy(RuntimeMode::Production);
        for code in [500, 599, 600, 650, 999] {
            let err = RaisedError::new("db password=hunter2 at db-primary").with_status(code);
            let (status, env) = p.handle(&err, &ctx());
            assert_eq!(status.as_u16(), code);
            assert_eq!(env.message(), INTERNAL_ERROR_MESSAGE, "status {code}");
        }

        let (_, env) = p.handle(&RaisedError::new("").with_status(700), &ctx());
        assert_eq!(env.message(), INTERNAL_ERROR_MESSAGE);
    }

    #[test]
    fn generic_client_error_keeps_message_in_production() {
        let err = RaisedError::new("Post is locked").with_status(423);
        let (status, env) = policy(RuntimeMode::Production).0.handle(&err, &ctx());
        assert_eq!(status.as_u16(), 423);
        assert_eq!(env.message(), "Post is locked");
    }

    #[test]
    fn empty_message_gets_fallback() {
        let err = RaisedError::new("").with_status(400);
        for mode in [RuntimeMode::Production, RuntimeMode::Development] {
            let (_, env) = policy(mode).0.handle(&err, &ctx());
            assert_eq!(env.message(), EMPTY_MESSAGE_FALLBACK);
        }

        let (_, env) = policy(RuntimeMode::Development).0.handle(&RaisedError::new(""), &ctx());
        assert_eq!(env.message(), EMPTY_MESSAGE_FALLBACK);
    }

    #[test]
    fn one_record_per_call_in_both_modes() {
        for mode in [RuntimeMode::Production, RuntimeMode::Development] {
            let (p, sink) = policy(mode);
            let err = RaisedError::new("boom").with_stack("frame");
            let _ = p.handle(&err, &ctx());

            assert_eq!(sink.len(), 1);
            let entry = &sink.get_recent(1)[0];
            assert_eq!(entry.message.as_ref(), "boom");
            assert!(entry.fields.iter().any(|(k, v)| *k == "stack" && v.as_ref() == "frame"));
        }
    }

    #[test]
    fn failing_sink_does_not_affect_response() {
        fn rejecting(_: &DiagnosticRecord<'_>) -> Result<(), SinkError> {
            Err(SinkError::Rejected { reason: "disk full".into() })
        }
        let p = ErrorResponsePolicy::new(RuntimeMode::Production, Arc::new(rejecting));
        let (status, env) = p.handle(&RaisedError::record_not_found("x"), &ctx());
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(env.message(), "Resource not found");
    }

    #[test]
    fn panicking_sink_is_absorbed() {
        fn exploding(_: &DiagnosticRecord<'_>) -> Result<(), SinkError> {
            panic!("sink exploded");
        }
        let p = ErrorResponsePolicy::new(RuntimeMode::Development, Arc::new(exploding));
        let (status, env) = p.handle(&RaisedError::new("boom"), &ctx());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(env.message(), "boom");
    }

    #[test]
    fn not_found_scenario() {
        let (status, env) = not_found("POST", "/api/missing");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            as_json(&env),
            json!({ "success": false, "message": "Route POST /api/missing not found" })
        );
    }
}
