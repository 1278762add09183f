//! Canonical cache key generation (spec §4.4 `generateKey`).
//!
//! A key is canonical only when its parameters are serialized in
//! sorted-key order — two semantically equal requests that differ only in
//! field order must still produce the identical key (spec §8, "Cache key
//! stability").

use serde_json::Value;

/// The 32-bit polynomial hash: `h = (h<<5) - h + byte`,
/// folded over the UTF-8 bytes of the canonical parameter serialization,
/// emitted as base-36 of its absolute value.
#[must_use]
pub fn polynomial_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for byte in input.bytes() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(byte));
    }
    radix36(hash.unsigned_abs())
}

fn radix36(mut n: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("radix-36 digits are ASCII")
}

/// Serialize `params` into a canonical string: object keys recursively
/// sorted, arrays left in their given order (the compiler's filter sets
/// are already `BTreeSet`s, so caller-visible order is already stable).
#[must_use]
pub fn canonicalize(params: &Value) -> String {
    match params {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> =
                keys.into_iter().map(|k| format!("{k}:{}", canonicalize(&map[k]))).collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// Generate a stable cache key: `"cache:" + prefix + ":" + hash(sorted_params)`.
#[must_use]
pub fn generate_key(prefix: &str, params: &Value) -> String {
    let canonical = canonicalize(params);
    format!("cache:{prefix}:{}", polynomial_hash(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_stable_across_field_order() {
        let a = json!({"protocols": ["pump_fun"], "first": 10});
        let b = json!({"first": 10, "protocols": ["pump_fun"]});
        assert_eq!(generate_key("scan", &a), generate_key("scan", &b));
    }

    #[test]
    fn different_params_produce_different_keys() {
        let a = json!({"first": 10});
        let b = json!({"first": 20});
        assert_ne!(generate_key("scan", &a), generate_key("scan", &b));
    }

    #[test]
    fn key_carries_prefix_and_cache_namespace() {
        let key = generate_key("aggregate", &json!({}));
        assert!(key.starts_with("cache:aggregate:"));
    }

    #[test]
    fn nested_object_key_order_does_not_affect_hash() {
        let a = json!({"dateRange": {"start": "2025-01-01", "end": "2025-01-31"}});
        let b = json!({"dateRange": {"end": "2025-01-31", "start": "2025-01-01"}});
        assert_eq!(generate_key("scan", &a), generate_key("scan", &b));
    }

    proptest::proptest! {
        #[test]
        fn hash_is_deterministic(s in ".*") {
            prop_assert_eq!(polynomial_hash(&s), polynomial_hash(&s));
        }
    }
}
