//! Deterministic identity of an operation call.

use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 over the action name and the canonical JSON of its params.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(action: &str, params: &Map<String, Value>) -> Self {
        let mut canonical = String::new();
        write_canonical(&Value::Object(params.clone()), &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(action.as_bytes());
        hasher.update(b"|");
        hasher.update(canonical.as_bytes());
        Self(format!("{:064x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Object keys are emitted sorted at every depth so key order never changes
// the fingerprint.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::compute("fetch", &params(json!({"url": "x", "n": 1})));
        let b = Fingerprint::compute("fetch", &params(json!({"n": 1, "url": "x"})));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_varies_by_action_and_params() {
        let p = params(json!({"url": "x"}));
        assert_ne!(
            Fingerprint::compute("fetch", &p),
            Fingerprint::compute("download", &p)
        );
        assert_ne!(
            Fingerprint::compute("fetch", &p),
            Fingerprint::compute("fetch", &params(json!({"url": "y"})))
        );
    }
}
