//! Structured diagnostic records and the sinks that receive them.
//!
//! # Critical Properties
//!
//! - A [`DiagnosticRecord`] borrows from the fault and request it describes
//!   and CANNOT outlive them
//! - Structured accessors return the original data, untruncated
//! - Text rendering via [`DiagnosticRecord::write_to`] truncates every field
//!   to a fixed bound at a UTF-8 boundary
//! - Sinks report failure through [`SinkError`]; the policy decides what to
//!   do with it (it swallows it)
//!
//! The short lifetime is a FEATURE: request bodies and stack traces reach the
//! sink for the duration of one call and are not retained by the record.

use crate::{ErrorKind, RaisedError, RequestContext};
use http::StatusCode;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// Maximum length for any individual field in formatted output (DoS prevention)
const MAX_FIELD_OUTPUT_LEN: usize = 1024;

/// Truncation indicator appended to truncated strings
const TRUNCATION_INDICATOR: &str = "...[TRUNCATED]";

/// `tracing` target used for diagnostic events.
pub const LOG_TARGET: &str = "wellsense_errors::policy";

// ============================================================================
// Diagnostic Record
// ============================================================================

/// Complete diagnostic view of one handled fault.
///
/// # Example
///
/// ```rust
/// # use wellsense_errors::{DiagnosticRecord, RaisedError, RequestContext};
/// let err = RaisedError::new("db timeout").with_stack("at query (repo.rs:40)");
/// let ctx = RequestContext::new("GET", "/api/posts");
/// let record = DiagnosticRecord::capture(&err, &ctx);
///
/// assert_eq!(record.message(), "db timeout");
/// assert_eq!(record.path(), "/api/posts");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticRecord<'a> {
    message: &'a str,
    stack_trace: Option<&'a str>,
    method: &'a str,
    path: &'a str,
    body: &'a Value,
    user_id: Option<&'a str>,
    code: Option<&'a str>,
    name: Option<&'a str>,
    kind: ErrorKind,
    status: StatusCode,
}

impl<'a> DiagnosticRecord<'a> {
    /// Borrow everything the operator needs from a fault and its request.
    pub fn capture(err: &'a RaisedError, ctx: &'a RequestContext) -> Self {
        Self {
            message: err.message(),
            stack_trace: err.stack(),
            method: ctx.method(),
            path: ctx.path(),
            body: ctx.body(),
            user_id: ctx.user_id(),
            code: err.code(),
            name: err.name(),
            kind: err.kind(),
            status: err.status(),
        }
    }

    /// Original fault message.
    #[inline]
    pub const fn message(&self) -> &'a str {
        self.message
    }

    /// Origin stack trace, if captured.
    #[inline]
    pub const fn stack_trace(&self) -> Option<&'a str> {
        self.stack_trace
    }

    /// Request method.
    #[inline]
    pub const fn method(&self) -> &'a str {
        self.method
    }

    /// Request path.
    #[inline]
    pub const fn path(&self) -> &'a str {
        self.path
    }

    /// Request body; `Null` when absent.
    #[inline]
    pub const fn body(&self) -> &'a Value {
        self.body
    }

    /// Authenticated caller, if any.
    #[inline]
    pub const fn user_id(&self) -> Option<&'a str> {
        self.user_id
    }

    /// Native library code, if any.
    #[inline]
    pub const fn code(&self) -> Option<&'a str> {
        self.code
    }

    /// Native error type name, if any.
    #[inline]
    pub const fn name(&self) -> Option<&'a str> {
        self.name
    }

    /// Classified kind.
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Status the response will carry.
    #[inline]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Write a single-line rendering with every field truncated.
    ///
    /// Example:
    /// ```rust,ignore
    /// let mut line = String::new();
    /// record.write_to(&mut line)?;
    /// ```
    pub fn write_to(&self, f: &mut impl fmt::Write) -> fmt::Result {
        write!(
            f,
            "[{} {}] {} {} message='{}'",
            self.status.as_u16(),
            self.kind,
            truncate_with_indicator(self.method),
            truncate_with_indicator(self.path),
            truncate_with_indicator(self.message)
        )?;

        if let Some(code) = self.code {
            write!(f, " code='{}'", truncate_with_indicator(code))?;
        }
        if let Some(name) = self.name {
            write!(f, " name='{}'", truncate_with_indicator(name))?;
        }
        if let Some(user) = self.user_id {
            write!(f, " user='{}'", truncate_with_indicator(user))?;
        }
        if !self.body.is_null() {
            let body = self.body.to_string();
            write!(f, " body='{}'", truncate_with_indicator(&body))?;
        }
        if let Some(stack) = self.stack_trace {
            write!(f, " stack='{}'", truncate_with_indicator(stack))?;
        }

        Ok(())
    }

    /// Format for human-readable logs in trusted debug contexts.
    ///
    /// Only available with BOTH the `trusted_debug` feature AND debug
    /// assertions, so it cannot ship in a release build by accident.
    #[cfg(all(feature = "trusted_debug", debug_assertions))]
    pub fn format_for_trusted_debug(&self) -> String {
        let mut output = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_to(&mut output);
        output
    }
}

/// Truncate a string for display to prevent DoS via extremely long fields.
///
/// Returns a Cow<str> to avoid allocation when no truncation is needed.
fn truncate_with_indicator(s: &str) -> Cow<'_, str> {
    if s.len() <= MAX_FIELD_OUTPUT_LEN {
        return Cow::Borrowed(s);
    }

    let max_content_len = MAX_FIELD_OUTPUT_LEN.saturating_sub(TRUNCATION_INDICATOR.len());

    let mut idx = max_content_len;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }

    if idx == 0 {
        return Cow::Borrowed(TRUNCATION_INDICATOR);
    }

    let mut result = String::with_capacity(idx + TRUNCATION_INDICATOR.len());
    result.push_str(&s[..idx]);
    result.push_str(TRUNCATION_INDICATOR);
    Cow::Owned(result)
}

// ============================================================================
// Sinks
// ============================================================================

/// Failure reported by a [`DiagnosticSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink refused or failed to store the record.
    Rejected {
        /// Why the record was not stored.
        reason: Cow<'static, str>,
    },
    /// A sink panicked while recording.
    Panicked,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => write!(f, "diagnostic sink rejected record: {}", reason),
            Self::Panicked => f.write_str("diagnostic sink panicked"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Destination for diagnostic records.
///
/// Called once per handled fault, on the request's own thread or task.
/// Implementations should be fast and must not block for long.
pub trait DiagnosticSink: Send + Sync {
    /// Store or emit one record.
    fn record(&self, record: &DiagnosticRecord<'_>) -> Result<(), SinkError>;
}

impl<F> DiagnosticSink for F
where
    F: Fn(&DiagnosticRecord<'_>) -> Result<(), SinkError> + Send + Sync,
{
    fn record(&self, record: &DiagnosticRecord<'_>) -> Result<(), SinkError> {
        self(record)
    }
}

/// Emits each record as one `tracing` error event on [`LOG_TARGET`].
///
/// Installing a subscriber is the application's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, record: &DiagnosticRecord<'_>) -> Result<(), SinkError> {
        tracing::error!(
            target: LOG_TARGET,
            kind = record.kind().label(),
            status = record.status().as_u16(),
            method = record.method(),
            path = record.path(),
            user_id = record.user_id(),
            error_code = record.code(),
            error_name = record.name(),
            error_message = record.message(),
            stack = record.stack_trace(),
            body = %record.body(),
            "request failed"
        );
        Ok(())
    }
}

/// Forwards each record to two sinks.
///
/// Both sinks are always called. The first failure is reported.
#[derive(Debug, Clone)]
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A, B> Tee<A, B> {
    /// Tee writing to `first`, then `second`.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> DiagnosticSink for Tee<A, B>
where
    A: DiagnosticSink,
    B: DiagnosticSink,
{
    fn record(&self, record: &DiagnosticRecord<'_>) -> Result<(), SinkError> {
        let first = self.first.record(record);
        let second = self.second.record(record);
        first.and(second)
    }
}
