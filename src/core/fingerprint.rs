//! Canonical hashing for cache fingerprints and artifact content.
//!
//! Fingerprints must be stable across processes, so values are hashed in a
//! canonical JSON form (object keys sorted, no whitespace).

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::step::Step;

/// Identity of one resolved input, as it enters the fingerprint
#[derive(Debug, Clone, PartialEq)]
pub enum InputIdentity {
    /// Artifact of an upstream step execution
    Artifact { fingerprint: String, output: String },

    /// Literal or run-parameter value
    Value(Value),
}

/// Compute the cache fingerprint of a step execution.
///
/// Upstream inputs contribute the producing execution's fingerprint rather
/// than the artifact content, so any upstream change propagates to every
/// downstream step.
pub fn step_fingerprint(step: &dyn Step, inputs: &BTreeMap<String, InputIdentity>) -> String {
    let inputs: serde_json::Map<String, Value> = inputs
        .iter()
        .map(|(name, identity)| {
            let value = match identity {
                InputIdentity::Artifact {
                    fingerprint,
                    output,
                } => json!({ "artifact": { "fingerprint": fingerprint, "output": output } }),
                InputIdentity::Value(v) => json!({ "value": v }),
            };
            (name.clone(), value)
        })
        .collect();

    let material = json!({
        "kind": step.kind(),
        "version": step.version(),
        "inputs": inputs,
    });

    hash_str(&to_canonical_json(&material))
}

/// Fingerprint of a non-cacheable step execution, derived from the content
/// of what it produced
pub fn output_fingerprint(base: &str, outputs: &BTreeMap<String, Value>) -> String {
    let hashes: serde_json::Map<String, Value> = outputs
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(content_hash(value))))
        .collect();

    let material = json!({
        "base": base,
        "outputs": hashes,
    });

    hash_str(&to_canonical_json(&material))
}

/// SHA-256 of a value's canonical encoding, hex encoded
pub fn content_hash(value: &Value) -> String {
    hash_str(&to_canonical_json(value))
}

/// SHA-256 of a string, hex encoded
pub fn hash_str(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize a JSON value with sorted object keys and no whitespace
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
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
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::StepError;
    use crate::core::step::{StepInputs, StepOutputs};
    use async_trait::async_trait;

    struct Versioned(&'static str);

    #[async_trait]
    impl Step for Versioned {
        fn kind(&self) -> &str {
            "versioned"
        }

        fn version(&self) -> &str {
            self.0
        }

        fn inputs(&self) -> &[&str] {
            &["x"]
        }

        fn outputs(&self) -> &[&str] {
            &["y"]
        }

        async fn compute(&self, _inputs: &StepInputs) -> Result<StepOutputs, StepError> {
            Ok(StepOutputs::new())
        }
    }

    fn literal(v: Value) -> BTreeMap<String, InputIdentity> {
        [("x".to_string(), InputIdentity::Value(v))].into_iter().collect()
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": [1, 2], "c": null}});
        assert_eq!(to_canonical_json(&a), r#"{"a":{"c":null,"d":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_content_hash_consistency() {
        let hash1 = content_hash(&json!({"a": 1, "b": 2}));
        let hash2 = content_hash(&json!({"b": 2, "a": 1}));
        let hash3 = content_hash(&json!({"a": 1, "b": 3}));

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_version_and_inputs() {
        let base = step_fingerprint(&Versioned("1"), &literal(json!(1)));

        assert_eq!(base, step_fingerprint(&Versioned("1"), &literal(json!(1))));
        assert_ne!(base, step_fingerprint(&Versioned("2"), &literal(json!(1))));
        assert_ne!(base, step_fingerprint(&Versioned("1"), &literal(json!(2))));
    }

    #[test]
    fn test_output_fingerprint_follows_content() {
        let outputs =
            |v: Value| -> BTreeMap<String, Value> { [("y".to_string(), v)].into_iter().collect() };

        let a = output_fingerprint("base", &outputs(json!([1, 2])));
        assert_eq!(a, output_fingerprint("base", &outputs(json!([1, 2]))));
        assert_ne!(a, output_fingerprint("base", &outputs(json!([1, 3]))));
        assert_ne!(a, output_fingerprint("other", &outputs(json!([1, 2]))));
    }

    #[test]
    fn test_fingerprint_distinguishes_artifact_from_literal() {
        let artifact: BTreeMap<String, InputIdentity> = [(
            "x".to_string(),
            InputIdentity::Artifact {
                fingerprint: "abc".to_string(),
                output: "y".to_string(),
            },
        )]
        .into_iter()
        .collect();

        assert_ne!(
            step_fingerprint(&Versioned("1"), &artifact),
            step_fingerprint(&Versioned("1"), &literal(json!("abc")))
        );
    }
}
