//! Per-endpoint filter expressions for narrowing which events get
//! delivered.
//!
//! The grammar is deliberately tiny: `field=value` and `field!=value`,
//! evaluated against top-level payload keys. Anything the evaluator
//! cannot make sense of fails open: a malformed expression, a missing
//! field, or a non-scalar value all allow the delivery through. A typo
//! in a filter must never silently drop all traffic for an endpoint.

use serde_json::Value;

use crate::event::Payload;

/// A parsed filter predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    Equals { field: String, value: String },
    NotEquals { field: String, value: String },
}

impl FilterExpr {
    /// Parse `field=value` / `field!=value`. Returns `None` for anything
    /// outside the grammar (no operator, empty field name).
    pub fn parse(input: &str) -> Option<FilterExpr> {
        // `!=` first; a plain `=` scan would split "a!=b" after the '!'.
        if let Some(idx) = input.find("!=") {
            let field = input[..idx].trim();
            let value = input[idx + 2..].trim();
            if field.is_empty() {
                return None;
            }
            return Some(FilterExpr::NotEquals {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        if let Some(idx) = input.find('=') {
            let field = input[..idx].trim();
            let value = input[idx + 1..].trim();
            if field.is_empty() {
                return None;
            }
            return Some(FilterExpr::Equals {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        None
    }

    /// Evaluate against a payload. Missing fields and non-scalar values
    /// match unconditionally.
    pub fn matches(&self, payload: &Payload) -> bool {
        let (field, value, negate) = match self {
            FilterExpr::Equals { field, value } => (field, value, false),
            FilterExpr::NotEquals { field, value } => (field, value, true),
        };

        let Some(actual) = payload.get(field) else {
            return true;
        };
        let Some(text) = scalar_text(actual) else {
            return true;
        };

        (text == *value) != negate
    }
}

/// Evaluate a raw expression string against a payload, fail-open.
///
/// This is the hot-path entry used at fan-out time; malformed
/// expressions were already warned about at registration, so here they
/// just match.
pub fn payload_matches(payload: &Payload, expression: &str) -> bool {
    match FilterExpr::parse(expression) {
        Some(expr) => expr.matches(payload),
        None => true,
    }
}

/// Canonical comparison text for scalar JSON values.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Object(_) | Value::Array(_) => None,
    }
}
