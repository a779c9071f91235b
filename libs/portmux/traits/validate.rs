//! Payload validators.
//!
//! Validation is per-listener: every registration carries its own predicate,
//! and a payload rejected by one listener's validator may still be accepted
//! by another's. The defaults live here so no call site re-derives them.

use serde_json::Value;
use std::sync::Arc;

/// Shared predicate deciding whether a listener accepts a payload.
pub type Validator<P> = Arc<dyn Fn(&P) -> bool + Send + Sync>;

/// The named default validator: accepts every payload.
///
/// For a typed payload every delivered value already exists, so the generic
/// default admits all of them. Registration sites that pass no validator get
/// this one.
pub fn accept_all<P>() -> Validator<P> {
    Arc::new(|_| true)
}

/// Truthiness check for JSON payloads: rejects `null`, `false`, `0`, `NaN`
/// and the empty string, accepts everything else.
pub fn truthy() -> Validator<Value> {
    Arc::new(|value| match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}
