//! Queue name normalization.
//!
//! Consumer-facing APIs take free-form logical names; the wire-level
//! identifier is derived deterministically so `"Foo Bar"` and `"foo-bar"`
//! address the same queue instead of silently creating two.

use super::QueueError;

/// Suffix appended to a queue name to derive its dead-letter queue.
pub const DLQ_SUFFIX: &str = ".dlq";

/// Normalize a logical queue name into its wire-level identifier.
///
/// Trims, collapses internal whitespace runs into a single `-`, strips
/// every character outside `[A-Za-z0-9._-]`, and lowercases. A name that
/// normalizes to the empty string is a programmer error.
pub fn normalize_queue_name(raw: &str) -> Result<String, QueueError> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            pending_separator = !out.is_empty();
            continue;
        }
        if !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')) {
            continue;
        }
        if pending_separator {
            out.push('-');
            pending_separator = false;
        }
        out.push(ch.to_ascii_lowercase());
    }
    if out.is_empty() {
        return Err(QueueError::InvalidQueueName {
            raw: raw.to_string(),
        });
    }
    Ok(out)
}

/// Dead-letter queue name for a normalized queue name.
#[must_use]
pub fn dlq_name(queue: &str) -> String {
    format!("{queue}{DLQ_SUFFIX}")
}
