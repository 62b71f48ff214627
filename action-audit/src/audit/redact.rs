//! Recursive redaction of sensitive values
//!
//! Any mapping key whose name contains one of the sensitive fragments
//! (case-insensitive) has its value replaced with [`REDACTED`], whatever the
//! value's type. Everything else keeps its shape and key order.

use serde::Serialize;
use serde_json::{Map, Value};

/// Marker substituted for sensitive values
pub const REDACTED: &str = "[REDACTED]";

/// Marker substituted for values that cannot be represented
pub const UNSERIALIZABLE: &str = "[UNSERIALIZABLE]";

/// Built-in sensitive key fragments
pub const SENSITIVE_KEY_PATTERNS: &[&str] =
    &["password", "pass", "pwd", "token", "authorization", "auth"];

/// Subtrees nested deeper than this are replaced with [`UNSERIALIZABLE`]
pub const MAX_DEPTH: usize = 64;

/// Pure sanitizer for arbitrary nested data
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            patterns: SENSITIVE_KEY_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl Redactor {
    /// Create a redactor with the built-in patterns
    pub fn new() -> Self {
        Self::default()
    }

    /// Add extra key fragments on top of the built-in set
    pub fn with_extra_patterns<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in extra {
            let pattern = pattern.as_ref().trim().to_ascii_lowercase();
            if !pattern.is_empty() && !self.patterns.contains(&pattern) {
                self.patterns.push(pattern);
            }
        }
        self
    }

    /// Whether a key name is sensitive
    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.patterns.iter().any(|p| key.contains(p.as_str()))
    }

    /// Redact a JSON value, returning a new tree
    pub fn redact(&self, value: &Value) -> Value {
        self.redact_at(value, 0)
    }

    /// Redact a mapping, returning a new mapping with identical keys
    pub fn redact_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        self.redact_object(map, 0)
    }

    /// Serialize any value and redact the result
    ///
    /// Values that cannot be turned into JSON become [`UNSERIALIZABLE`].
    pub fn redact_serializable<T: Serialize + ?Sized>(&self, value: &T) -> Value {
        match serde_json::to_value(value) {
            Ok(value) => self.redact(&value),
            Err(e) => {
                tracing::debug!(error = %e, "value could not be serialized for redaction");
                Value::String(UNSERIALIZABLE.to_string())
            }
        }
    }

    fn redact_at(&self, value: &Value, depth: usize) -> Value {
        if depth > MAX_DEPTH {
            return Value::String(UNSERIALIZABLE.to_string());
        }
        match value {
            Value::Object(map) => Value::Object(self.redact_object(map, depth)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.redact_at(item, depth + 1))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    fn redact_object(&self, map: &Map<String, Value>, depth: usize) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive_key(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    self.redact_at(value, depth + 1)
                };
                (key.clone(), value)
            })
            .collect()
    }
}
