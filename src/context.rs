//! Request context captured at the moment a request fails.
//!
//! The policy only reads this data: it goes into the diagnostic record and
//! never into the response. Request bodies routinely carry credentials, so
//! every owned string in the body is zeroized when the context drops.
//!
//! # Example
//!
//! ```rust
//! use wellsense_errors::RequestContext;
//! use serde_json::json;
//!
//! let ctx = RequestContext::builder("POST", "/api/auth/login")
//!     .body(json!({ "email": "a@b.c" }))
//!     .user_id("user_42")
//!     .build();
//!
//! assert_eq!(ctx.method(), "POST");
//! assert_eq!(ctx.user_id(), Some("user_42"));
//! ```

use serde_json::Value;
use std::fmt;
use zeroize::Zeroize;

/// Ambient information about the in-flight request.
pub struct RequestContext {
    method: String,
    path: String,
    body: Value,
    user_id: Option<String>,
}

impl RequestContext {
    /// Context with no body and no authenticated user.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: Value::Null,
            user_id: None,
        }
    }

    /// Start building a context for `method` and `path`.
    #[inline]
    pub fn builder(method: impl Into<String>, path: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            inner: Self::new(method, path),
        }
    }

    /// HTTP method.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path, without the query string.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request body as parsed JSON; `Null` when absent or not JSON.
    #[inline]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Identifier of the authenticated caller, if any.
    #[inline]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

impl Zeroize for RequestContext {
    fn zeroize(&mut self) {
        self.method.zeroize();
        self.path.zeroize();
        zeroize_value(&mut self.body);
        if let Some(ref mut id) = self.user_id {
            id.zeroize();
        }
        self.user_id = None;
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("body", &"<REDACTED>")
            .field("user_id", &self.user_id.as_ref().map(|_| "<PRESENT>"))
            .finish()
    }
}

/// Clear every owned string reachable from a JSON value, then reset it to `Null`.
fn zeroize_value(value: &mut Value) {
    match value {
        Value::String(s) => s.zeroize(),
        Value::Array(items) => {
            for item in items.iter_mut() {
                zeroize_value(item);
            }
            items.clear();
        }
        Value::Object(map) => {
            for (mut key, mut item) in std::mem::take(map) {
                key.zeroize();
                zeroize_value(&mut item);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    *value = Value::Null;
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`RequestContext`].
#[must_use = "builders do nothing unless built"]
pub struct ContextBuilder {
    inner: RequestContext,
}

impl ContextBuilder {
    /// Attach the parsed request body.
    pub fn body(mut self, body: Value) -> Self {
        self.inner.body = body;
        self
    }

    /// Attach the authenticated caller.
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.inner.user_id = Some(id.into());
        self
    }

    /// Attach the authenticated caller when one is known.
    pub fn maybe_user_id(mut self, id: Option<String>) -> Self {
        self.inner.user_id = id;
        self
    }

    /// Finish the context.
    pub fn build(self) -> RequestContext {
        self.inner
    }
}
