//! # WellSense Errors
//!
//! Terminal error handling for HTTP services: classify every fault, log it in
//! full, and answer the caller with only what the runtime mode allows.
//!
//! ## Design Philosophy
//!
//! 1. **Operators see everything**: every handled fault produces exactly one
//!    complete diagnostic record, whatever the mode
//! 2. **Callers see the approved subset**: in production the response carries
//!    a fixed message and nothing else
//! 3. **Classification happens once**: a fault gets its [`ErrorKind`] where it
//!    is caught, from an explicit table, not by re-inspecting fields later
//! 4. **The handler cannot fail**: sink errors and sink panics are absorbed
//! 5. **Mode is injected**: the policy never reads the environment while
//!    handling a request
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use wellsense_errors::{ErrorResponsePolicy, RaisedError, RequestContext, RuntimeMode, TracingSink};
//!
//! let policy = ErrorResponsePolicy::new(RuntimeMode::Production, Arc::new(TracingSink));
//! let ctx = RequestContext::new("POST", "/api/users");
//!
//! let (status, envelope) = policy.handle(&RaisedError::unique_violation(["email"]), &ctx);
//! assert_eq!(status.as_u16(), 409);
//! assert_eq!(envelope.message(), "Resource conflict");
//! assert!(envelope.field().is_none());
//! ```
//!
//! ## Features
//!
//! - `axum` (default): error boundary middleware, route fallback and
//!   `IntoResponse` implementations
//! - `trusted_debug`: single-string rendering of diagnostic records for
//!   trusted environments (debug builds only)

#![warn(missing_docs)]
#![warn(clippy::all)]

use http::StatusCode;
use serde_json::{Map, Value};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::io;
use std::result;
use std::sync::Arc;
use zeroize::Zeroize;

pub mod config;
pub mod context;
pub mod envelope;
pub mod kinds;
pub mod logging;
pub mod policy;
pub mod ring_buffer;
#[cfg(feature = "axum")]
pub mod web;

pub use config::*;
pub use context::*;
pub use envelope::*;
pub use kinds::*;
pub use logging::*;
pub use policy::*;
pub use ring_buffer::*;

/// Type alias for Results using our error type.
pub type Result<T> = result::Result<T, RaisedError>;

/// Fallback message when a fault carries no text.
pub const EMPTY_MESSAGE_FALLBACK: &str = "An error occurred";

#[inline]
const fn io_error_kind_label(kind: io::ErrorKind) -> &'static str {
    match kind {
        io::ErrorKind::NotFound => "NotFound",
        io::ErrorKind::PermissionDenied => "PermissionDenied",
        io::ErrorKind::ConnectionRefused => "ConnectionRefused",
        io::ErrorKind::ConnectionReset => "ConnectionReset",
        io::ErrorKind::ConnectionAborted => "ConnectionAborted",
        io::ErrorKind::NotConnected => "NotConnected",
        io::ErrorKind::AddrInUse => "AddrInUse",
        io::ErrorKind::BrokenPipe => "BrokenPipe",
        io::ErrorKind::AlreadyExists => "AlreadyExists",
        io::ErrorKind::WouldBlock => "WouldBlock",
        io::ErrorKind::InvalidInput => "InvalidInput",
        io::ErrorKind::InvalidData => "InvalidData",
        io::ErrorKind::TimedOut => "TimedOut",
        io::ErrorKind::Interrupted => "Interrupted",
        io::ErrorKind::Unsupported => "Unsupported",
        io::ErrorKind::UnexpectedEof => "UnexpectedEof",
        io::ErrorKind::OutOfMemory => "OutOfMemory",
        io::ErrorKind::Other => "Other",
        _ => "Unknown",
    }
}

/// A fault as observed by the response policy.
///
/// # Key Properties
///
/// - The [`ErrorKind`] is derived at construction and re-derived whenever the
///   message, code or name changes, so it always agrees with [`classify`]
/// - Message and stack are zeroized on drop
/// - `Display` and `Debug` reveal only the kind and status, never the message
/// - Cheap to clone (the source error is shared)
///
/// # Typed Constructors
///
/// Where a native failure is caught, prefer the typed constructors
/// (`unique_violation`, `validation`, `expired_token`, ...). They set the
/// native code or name the classification table expects, so the kind is
/// fixed at the boundary.
#[derive(Clone)]
#[must_use = "errors should be handled or logged"]
pub struct RaisedError {
    message: String,
    code: Option<String>,
    name: Option<String>,
    kind: ErrorKind,
    status: Option<u16>,
    stack: Option<String>,
    metadata: Option<Map<String, Value>>,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl RaisedError {
    /// Create a fault with a message only. Classified by message alone.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify(&message, None, None);
        Self {
            message,
            code: None,
            name: None,
            kind,
            status: None,
            stack: None,
            metadata: None,
            source: None,
        }
    }

    /// Cross-origin rejection for `origin`.
    pub fn cors(origin: &str) -> Self {
        Self::new(format!("{CORS_MARKER} policy violation from {origin}"))
    }

    /// Unique-constraint collision on `fields`, first field reported.
    pub fn unique_violation<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target: Vec<Value> = fields.into_iter().map(|f| Value::String(f.into())).collect();
        let listed = target
            .iter()
            .filter_map(Value::as_str)
            .map(|f| format!("`{f}`"))
            .collect::<Vec<_>>()
            .join(", ");

        Self::new(format!("Unique constraint failed on the fields: ({listed})"))
            .with_code(CODE_UNIQUE_CONSTRAINT)
            .with_meta("target", Value::Array(target))
    }

    /// Required record was not found.
    pub fn record_not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_code(CODE_RECORD_NOT_FOUND)
    }

    /// Payload failed validation; `details` is the structured message list.
    pub fn validation(details: Value) -> Self {
        Self::new("Validation failed")
            .with_name(NAME_VALIDATION)
            .with_meta("details", details)
    }

    /// Token could not be verified.
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(message).with_name(NAME_TOKEN_INVALID)
    }

    /// Token has expired.
    pub fn expired_token() -> Self {
        Self::new("jwt expired").with_name(NAME_TOKEN_EXPIRED)
    }

    /// Generic fault with a suggested status.
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status.as_u16())
    }

    // ------------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------------

    /// Set the native library code and reclassify.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self.reclassify();
        self
    }

    /// Set the native error type name and reclassify.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.reclassify();
        self
    }

    /// Replace the message and reclassify.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message.zeroize();
        self.message = message.into();
        self.reclassify();
        self
    }

    /// Suggest an HTTP status. Only generic faults honour it.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach an origin stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attach the current backtrace if the runtime captures one.
    ///
    /// Capture follows `RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`; when disabled
    /// the stack stays unset.
    pub fn with_backtrace(mut self) -> Self {
        let trace = Backtrace::capture();
        if trace.status() == BacktraceStatus::Captured {
            self.stack = Some(trace.to_string());
        }
        self
    }

    /// Add one metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }

    /// Replace all metadata.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Keep `source` as the cause. When no stack is set yet, the rendered
    /// cause chain is used as the stack.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        if self.stack.is_none() {
            self.stack = Some(render_chain(&source));
        }
        self.source = Some(Arc::new(source));
        self
    }

    #[inline]
    fn reclassify(&mut self) {
        self.kind = classify(&self.message, self.code.as_deref(), self.name.as_deref());
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Classified kind.
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Original message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Native library code, if any.
    #[inline]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Native error type name, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Status suggested by the raiser, as given.
    #[inline]
    pub const fn suggested_status(&self) -> Option<u16> {
        self.status
    }

    /// Origin stack trace, if captured.
    #[inline]
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Auxiliary metadata, if any.
    #[inline]
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref()
    }

    /// Status this fault resolves to.
    ///
    /// Fixed per kind, except `Generic`, which uses the suggested status when
    /// it is a valid HTTP status and 500 otherwise.
    pub fn status(&self) -> StatusCode {
        self.kind.fixed_status().unwrap_or_else(|| {
            self.status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }

    /// First element of `metadata.target`, if it is a string.
    pub fn conflicting_field(&self) -> Option<&str> {
        self.metadata
            .as_ref()?
            .get("target")?
            .as_array()?
            .first()?
            .as_str()
    }

    /// `metadata.details`, if present.
    pub fn validation_details(&self) -> Option<&Value> {
        self.metadata.as_ref()?.get("details")
    }
}

fn render_chain(err: &(dyn Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        out.push_str("\n    caused by: ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}

impl Drop for RaisedError {
    fn drop(&mut self) {
        self.message.zeroize();
        if let Some(ref mut stack) = self.stack {
            stack.zeroize();
        }
    }
}

impl fmt::Debug for RaisedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaisedError")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("message", &"<REDACTED>")
            .field("stack", &self.stack.as_ref().map(|_| "<PRESENT>"))
            .field("source", &self.source.as_ref().map(|_| "<PRESENT>"))
            .finish()
    }
}

impl fmt::Display for RaisedError {
    /// External display: kind and resolved status only.
    ///
    /// Format: "{kind} error ({status})", e.g. "record_not_found error (404)".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error ({})", self.kind, self.status().as_u16())
    }
}

impl Error for RaisedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

// ============================================================================
// Boundary Conversions
// ============================================================================

impl From<io::Error> for RaisedError {
    fn from(err: io::Error) -> Self {
        let label = io_error_kind_label(err.kind());
        Self::new(err.to_string())
            .with_meta("io_kind", Value::String(label.to_owned()))
            .with_source(err)
    }
}

impl From<serde_json::Error> for RaisedError {
    fn from(err: serde_json::Error) -> Self {
        let detail = serde_json::json!([{
            "message": err.to_string(),
            "line": err.line(),
            "column": err.column(),
        }]);
        Self::validation(detail).with_message(err.to_string())
    }
}
