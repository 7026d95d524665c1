//! External-facing response envelope and the disclosure gate.
//!
//! # Trust Boundary
//!
//! Everything in this module crosses to the caller. Diagnostic detail
//! (stack traces, validation messages, conflicting field names, raw metadata)
//! travels in [`DiagnosticExtras`], which has no serializer of its own. The
//! only way to get extras onto the wire is [`ResponseEnvelope::sanitized`],
//! and that constructor drops them when the mode is
//! [`RuntimeMode::Production`].
//!
//! # Wire Format
//!
//! ```json
//! { "success": false, "message": "Resource already exists", "field": "email" }
//! ```
//!
//! Absent optional fields are omitted rather than serialized as `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Environment value that selects production mode.
pub const PRODUCTION_ENV_VALUE: &str = "production";

// ============================================================================
// Runtime Mode
// ============================================================================

/// Whether diagnostic detail may reach callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Responses carry only the policy-approved message.
    Production,
    /// Responses may carry stack traces and structured details.
    #[default]
    Development,
}

impl RuntimeMode {
    /// Map an environment value to a mode.
    ///
    /// Only the exact string `"production"` selects production; anything else,
    /// including an unset variable or `"Production"`, is non-production.
    #[inline]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(PRODUCTION_ENV_VALUE) => Self::Production,
            _ => Self::Development,
        }
    }

    /// True for [`RuntimeMode::Production`].
    #[inline]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl From<bool> for RuntimeMode {
    /// `true` means production.
    fn from(is_production: bool) -> Self {
        if is_production {
            Self::Production
        } else {
            Self::Development
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Development => f.write_str("development"),
        }
    }
}

// ============================================================================
// Diagnostic Extras
// ============================================================================

/// Diagnostic fields a non-production envelope may carry.
///
/// Deliberately not `Serialize`: it reaches the wire only through
/// [`ResponseEnvelope::sanitized`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticExtras {
    /// Origin stack trace.
    pub stack: Option<String>,
    /// Structured validation messages.
    pub errors: Option<Value>,
    /// Field that collided with a unique index.
    pub field: Option<String>,
    /// Raw metadata attached to a generic error.
    pub details: Option<Value>,
}

impl DiagnosticExtras {
    /// True when no field is populated.
    pub fn is_empty(&self) -> bool {
        self.stack.is_none()
            && self.errors.is_none()
            && self.field.is_none()
            && self.details.is_none()
    }
}

// ============================================================================
// Response Envelope
// ============================================================================

/// JSON body returned on every error path.
///
/// Serialize-only: an envelope is built by this crate, never parsed, so
/// `success` cannot arrive as `true`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ResponseEnvelope {
    /// Envelope carrying only a message.
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            stack: None,
            errors: None,
            field: None,
            details: None,
        }
    }

    /// Envelope with extras attached only when `mode` allows disclosure.
    pub fn sanitized(
        message: impl Into<String>,
        extras: DiagnosticExtras,
        mode: RuntimeMode,
    ) -> Self {
        let mut envelope = Self::message_only(message);
        if mode.is_production() {
            return envelope;
        }

        let DiagnosticExtras {
            stack,
            errors,
            field,
            details,
        } = extras;
        envelope.stack = stack;
        envelope.errors = errors;
        envelope.field = field;
        envelope.details = details;
        envelope
    }

    /// Always `false`.
    #[inline]
    pub const fn success(&self) -> bool {
        self.success
    }

    /// Caller-facing message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack trace, non-production only.
    #[inline]
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Validation messages, non-production only.
    #[inline]
    pub fn errors(&self) -> Option<&Value> {
        self.errors.as_ref()
    }

    /// Conflicting field, non-production only.
    #[inline]
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Raw metadata of a generic error, non-production only.
    #[inline]
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// True when any diagnostic field is present.
    pub fn has_diagnostics(&self) -> bool {
        self.stack.is_some()
            || self.errors.is_some()
            || self.field.is_some()
            || self.details.is_some()
    }
}
