//! Error taxonomy and classification tables.
//!
//! Every fault that reaches the response policy is reduced to one
//! [`ErrorKind`]. The reduction is a pure function of three inputs taken from
//! the fault as it was caught: the message, the native library code, and the
//! native error type name.
//!
//! # Priority
//!
//! Rules are checked in a fixed order and the first match wins:
//!
//! | Priority | Condition                          | Kind                       |
//! |----------|------------------------------------|----------------------------|
//! | 1        | message contains `"CORS"`          | `CorsViolation`            |
//! | 2        | code is `"P2002"`                  | `UniqueConstraintConflict` |
//! | 3        | code is `"P2025"`                  | `RecordNotFound`           |
//! | 4        | name is `"ValidationError"`        | `ValidationFailure`        |
//! | 5        | name is `"JsonWebTokenError"`      | `AuthTokenInvalid`         |
//! | 6        | name is `"TokenExpiredError"`      | `AuthTokenExpired`         |
//! | 7        | anything else                      | `Generic`                  |
//!
//! The CORS rule is a substring match on the message, not a type match. An
//! unrelated failure whose message happens to mention `CORS` is classified as
//! a CORS violation. Existing clients depend on this, so it is kept.
//!
//! # Example
//!
//! ```rust
//! use wellsense_errors::{ErrorKind, classify};
//!
//! assert_eq!(classify("boom", Some("P2002"), None), ErrorKind::UniqueConstraintConflict);
//! assert_eq!(classify("CORS blocked", Some("P2002"), None), ErrorKind::CorsViolation);
//! assert_eq!(classify("boom", None, None), ErrorKind::Generic);
//! ```

use http::StatusCode;
use std::fmt;

/// Substring that marks a message as a cross-origin rejection.
pub const CORS_MARKER: &str = "CORS";

/// Native code reported by the ORM for a unique-constraint violation.
pub const CODE_UNIQUE_CONSTRAINT: &str = "P2002";

/// Native code reported by the ORM when a required record does not exist.
pub const CODE_RECORD_NOT_FOUND: &str = "P2025";

/// Native error name used by request validators.
pub const NAME_VALIDATION: &str = "ValidationError";

/// Native error name for malformed or badly signed tokens.
pub const NAME_TOKEN_INVALID: &str = "JsonWebTokenError";

/// Native error name for tokens past their expiry.
pub const NAME_TOKEN_EXPIRED: &str = "TokenExpiredError";

// ============================================================================
// Error Kind
// ============================================================================

/// Internal discriminator used to pick a status code and message.
///
/// Copy because it is a small classification value; carrying it around by
/// value is cheaper than borrowing the fault it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Anything not matched by a more specific rule.
    Generic,
    /// Cross-origin request rejected.
    CorsViolation,
    /// Insert or update collided with a unique index.
    UniqueConstraintConflict,
    /// Record required by the operation does not exist.
    RecordNotFound,
    /// Request payload failed validation.
    ValidationFailure,
    /// Authentication token could not be verified.
    AuthTokenInvalid,
    /// Authentication token has expired.
    AuthTokenExpired,
}

impl ErrorKind {
    /// All kinds, in classification priority order with `Generic` last.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::CorsViolation,
        ErrorKind::UniqueConstraintConflict,
        ErrorKind::RecordNotFound,
        ErrorKind::ValidationFailure,
        ErrorKind::AuthTokenInvalid,
        ErrorKind::AuthTokenExpired,
        ErrorKind::Generic,
    ];

    /// Stable label used in diagnostic records.
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::CorsViolation => "cors_violation",
            Self::UniqueConstraintConflict => "unique_constraint_conflict",
            Self::RecordNotFound => "record_not_found",
            Self::ValidationFailure => "validation_failure",
            Self::AuthTokenInvalid => "auth_token_invalid",
            Self::AuthTokenExpired => "auth_token_expired",
        }
    }

    /// Fixed status for this kind, or `None` for `Generic`, whose status is
    /// chosen by the caller.
    #[inline]
    pub const fn fixed_status(self) -> Option<StatusCode> {
        match self {
            Self::Generic => None,
            Self::CorsViolation => Some(StatusCode::FORBIDDEN),
            Self::UniqueConstraintConflict => Some(StatusCode::CONFLICT),
            Self::RecordNotFound => Some(StatusCode::NOT_FOUND),
            Self::ValidationFailure => Some(StatusCode::BAD_REQUEST),
            Self::AuthTokenInvalid | Self::AuthTokenExpired => Some(StatusCode::UNAUTHORIZED),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Native Code Table
// ============================================================================

/// Which native field a table entry is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeField {
    /// Library error code, e.g. an ORM code.
    Code,
    /// Error type name.
    Name,
}

/// One row of the boundary mapping from native identifiers to kinds.
#[derive(Debug, Clone, Copy)]
pub struct NativeMapping {
    /// Field the identifier is compared against.
    pub field: NativeField,
    /// Exact identifier value.
    pub ident: &'static str,
    /// Resulting kind.
    pub kind: ErrorKind,
}

/// Native identifiers checked after the CORS rule, in priority order.
pub const NATIVE_CODES: [NativeMapping; 5] = [
    NativeMapping {
        field: NativeField::Code,
        ident: CODE_UNIQUE_CONSTRAINT,
        kind: ErrorKind::UniqueConstraintConflict,
    },
    NativeMapping {
        field: NativeField::Code,
        ident: CODE_RECORD_NOT_FOUND,
        kind: ErrorKind::RecordNotFound,
    },
    NativeMapping {
        field: NativeField::Name,
        ident: NAME_VALIDATION,
        kind: ErrorKind::ValidationFailure,
    },
    NativeMapping {
        field: NativeField::Name,
        ident: NAME_TOKEN_INVALID,
        kind: ErrorKind::AuthTokenInvalid,
    },
    NativeMapping {
        field: NativeField::Name,
        ident: NAME_TOKEN_EXPIRED,
        kind: ErrorKind::AuthTokenExpired,
    },
];

/// Classify a fault from its message, native code and native name.
///
/// Pure and order-sensitive; see the module docs for the priority table.
pub fn classify(message: &str, code: Option<&str>, name: Option<&str>) -> ErrorKind {
    if message.contains(CORS_MARKER) {
        return ErrorKind::CorsViolation;
    }

    NATIVE_CODES
        .iter()
        .find(|row| {
            let candidate = match row.field {
                NativeField::Code => code,
                NativeField::Name => name,
            };
            candidate == Some(row.ident)
        })
        .map_or(ErrorKind::Generic, |row| row.kind)
}
