//! Structured execution errors with preserved cause chains.
//!
//! [`FlowError`] is the error *value* of the engine: it is attached to a
//! failed node, carried on result streams, and serialized across every
//! transport (remote execution stream, queue payloads) without losing the
//! original-cause chain. Module-level error *enums* (executor, queue,
//! remote, expression) live next to the code that raises them and follow
//! the usual `thiserror` + `miette` pattern; `FlowError` is deliberately a
//! plain serializable record instead, because its shape is part of the
//! wire contract.
//!
//! # JSON shape
//!
//! ```json
//! {
//!   "message": "crawl failed",
//!   "name": "CrawlError",
//!   "type": "nonRetriable",
//!   "statusCode": 502,
//!   "cause": { "message": "connect timeout", "name": "Error" }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Marker placed in [`FlowError::kind`] for errors that must short-circuit
/// any automatic redelivery or backoff policy.
pub const NON_RETRIABLE_KIND: &str = "nonRetriable";

/// Name assigned to errors produced by execution cancellation.
pub const CANCELLED_NAME: &str = "CancelledError";

fn default_error_name() -> String {
    "Error".to_string()
}

/// Serializable execution error with a recursive cause chain.
///
/// The field names mirror the wire contract exactly (`type`, `statusCode`
/// in JSON). `cause` boxes another `FlowError`, so an arbitrarily deep
/// chain round-trips through any JSON transport.
///
/// # Examples
///
/// ```
/// use flowloom::errors::FlowError;
///
/// let err = FlowError::msg("page fetch failed")
///     .with_status(502)
///     .with_cause(FlowError::named("TimeoutError", "connect timeout"));
///
/// assert_eq!(err.deepest().message, "connect timeout");
/// assert!(err.full_description().contains("page fetch failed"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowError {
    pub message: String,
    #[serde(default = "default_error_name")]
    pub name: String,
    /// Classifies the error beyond its name (for example
    /// [`NON_RETRIABLE_KIND`]). Serialized as `type`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Raw upstream response body, when the failure came from a remote call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<FlowError>>,
}

impl Default for FlowError {
    fn default() -> Self {
        FlowError {
            message: String::new(),
            name: default_error_name(),
            kind: None,
            status_code: None,
            response: None,
            stack: None,
            cause: None,
        }
    }
}

impl FlowError {
    /// Create an error with just a message and the default name.
    pub fn msg<M: Into<String>>(message: M) -> Self {
        FlowError {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Create an error with an explicit name.
    pub fn named<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        FlowError {
            message: message.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// The error attached to executions terminated by cancellation.
    pub fn cancelled() -> Self {
        FlowError::named(CANCELLED_NAME, "execution cancelled")
    }

    /// Create an error that must never be redelivered or retried.
    pub fn non_retriable<M: Into<String>>(message: M) -> Self {
        FlowError::msg(message).with_kind(NON_RETRIABLE_KIND)
    }

    #[must_use]
    pub fn with_kind<K: Into<String>>(mut self, kind: K) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    #[must_use]
    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.response = Some(response);
        self
    }

    #[must_use]
    pub fn with_stack<S: Into<String>>(mut self, stack: S) -> Self {
        self.stack = Some(stack.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: FlowError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns `true` if the execution was terminated by cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.name == CANCELLED_NAME
    }

    /// Returns `true` if this error (or any cause beneath it) is marked
    /// non-retriable. The check walks the chain so a wrapped upstream
    /// failure still short-circuits redelivery.
    #[must_use]
    pub fn is_non_retriable(&self) -> bool {
        self.chain()
            .any(|e| e.kind.as_deref() == Some(NON_RETRIABLE_KIND))
    }

    /// The most deeply nested error in the cause chain.
    ///
    /// This is usually the most actionable message: the original failure
    /// before any wrapping layers.
    #[must_use]
    pub fn deepest(&self) -> &FlowError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    /// Every error in the chain, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &FlowError> {
        std::iter::successors(Some(self), |e| e.cause.as_deref())
    }

    /// Full human-readable description of the whole chain, outermost first.
    ///
    /// ```
    /// use flowloom::errors::FlowError;
    ///
    /// let err = FlowError::msg("outer").with_cause(FlowError::msg("inner"));
    /// assert_eq!(err.full_description(), "outer: caused by: inner");
    /// ```
    #[must_use]
    pub fn full_description(&self) -> String {
        let mut out = String::new();
        for (idx, err) in self.chain().enumerate() {
            if idx > 0 {
                out.push_str(": caused by: ");
            }
            out.push_str(&err.message);
        }
        out
    }

    /// Build a `FlowError` from any std error, preserving its `source()`
    /// chain as nested causes.
    pub fn from_std(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut flow = FlowError::msg(err.to_string());
        if let Some(source) = err.source() {
            flow = flow.with_cause(FlowError::from_std(source));
        }
        flow
    }
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::named("SerdeError", err.to_string())
    }
}
