//! Opaque pagination cursors (spec §3, §6).
//!
//! A scan cursor encodes `"slot:signature"`; an aggregation cursor encodes
//! `"k1:v1|k2:v2|...|hash:h"` over the group-by values. Both are base64 of
//! plain UTF-8 and round-trip losslessly. Callers must treat the decoded
//! contents as opaque — the orchestrator and compiler are the only code
//! that ever constructs or inspects one.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// A decoded scan cursor: the sort key of the last row on the prior page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    /// `slot` of the boundary row.
    pub slot: u64,
    /// `signature` of the boundary row, as a tiebreaker.
    pub signature_hash: u64,
}

/// A decoded aggregation cursor: the group-by values of the last row on
/// the prior page, plus a hash guarding against a compiler bug that lets
/// two distinct rows share every group-by value (spec §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationCursor {
    /// `(alias, value)` pairs in group-by order.
    pub key_values: Vec<(String, String)>,
    /// Hash of the serialized key-value pairs.
    pub hash: String,
}

fn encode(plain: &str) -> String {
    BASE64.encode(plain.as_bytes())
}

fn decode(cursor: &str) -> Option<String> {
    BASE64.decode(cursor).ok().and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Encode a scan cursor from a raw `(slot, signature)` pair.
///
/// The signature is carried verbatim in the plaintext (not hashed) so the
/// orchestrator's decode side can recover the exact tiebreaker string used
/// in the original pagination predicate; [`ScanCursor::signature_hash`] is
/// a courtesy equality check, not the source of truth.
#[must_use]
pub fn encode_scan_cursor(slot: u64, signature: &str) -> String {
    encode(&format!("{slot}:{signature}"))
}

/// Decode a scan cursor back into its raw `(slot, signature)` pair.
///
/// Returns `None` on any malformed input; per spec §4.5 step 4, a
/// malformed cursor is silently dropped by the caller rather than
/// rejected with an error.
#[must_use]
pub fn decode_scan_cursor(cursor: &str) -> Option<(u64, String)> {
    let plain = decode(cursor)?;
    let (slot_str, signature) = plain.split_once(':')?;
    let slot: u64 = slot_str.parse().ok()?;
    Some((slot, signature.to_owned()))
}

/// Encode an aggregation cursor from ordered `(alias, value)` pairs.
#[must_use]
pub fn encode_aggregation_cursor(key_values: &[(String, String)]) -> String {
    let hash = hash_key_values(key_values);
    let mut parts: Vec<String> = key_values.iter().map(|(k, v)| format!("{k}:{v}")).collect();
    parts.push(format!("hash:{hash}"));
    encode(&parts.join("|"))
}

/// Decode an aggregation cursor back into ordered `(alias, value)` pairs
/// plus its embedded hash. Returns `None` on any malformed input.
#[must_use]
pub fn decode_aggregation_cursor(cursor: &str) -> Option<AggregationCursor> {
    let plain = decode(cursor)?;
    let mut parts: Vec<&str> = plain.split('|').collect();
    let hash_part = parts.pop()?;
    let hash = hash_part.strip_prefix("hash:")?.to_owned();

    let mut key_values = Vec::with_capacity(parts.len());
    for part in parts {
        let (k, v) = part.split_once(':')?;
        key_values.push((k.to_owned(), v.to_owned()));
    }
    Some(AggregationCursor { key_values, hash })
}

/// Same 32-bit polynomial hash the cache key scheme uses (spec §4.4),
/// reused here for the aggregation cursor's collision guard since both
/// serve the same "stable digest of ordered key-value pairs" role.
#[must_use]
pub fn hash_key_values(key_values: &[(String, String)]) -> String {
    let serialized: String = key_values.iter().map(|(k, v)| format!("{k}:{v}|")).collect();
    let mut hash: i32 = 0;
    for byte in serialized.bytes() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_cursor_round_trips() {
        let cursor = encode_scan_cursor(12345, "sig_abc123");
        let (slot, sig) = decode_scan_cursor(&cursor).expect("decodes");
        assert_eq!(slot, 12345);
        assert_eq!(sig, "sig_abc123");
    }

    #[test]
    fn scan_cursor_is_opaque_base64() {
        let cursor = encode_scan_cursor(1, "x");
        assert!(base64::engine::general_purpose::STANDARD.decode(&cursor).is_ok());
        assert_ne!(cursor, "1:x");
    }

    #[test]
    fn malformed_scan_cursor_decodes_to_none() {
        assert!(decode_scan_cursor("not valid base64!!").is_none());
        assert!(decode_scan_cursor(&encode("no-colon-here")).is_none());
    }

    #[test]
    fn aggregation_cursor_round_trips() {
        let kvs = vec![("protocol".to_owned(), "pump_fun".to_owned()), ("hour".to_owned(), "14".to_owned())];
        let cursor = encode_aggregation_cursor(&kvs);
        let decoded = decode_aggregation_cursor(&cursor).expect("decodes");
        assert_eq!(decoded.key_values, kvs);
        assert_eq!(decoded.hash, hash_key_values(&kvs));
    }

    #[test]
    fn malformed_aggregation_cursor_decodes_to_none() {
        assert!(decode_aggregation_cursor(&encode("missing-hash-field")).is_none());
    }

    #[test]
    fn hash_is_stable_for_same_inputs() {
        let kvs = vec![("a".to_owned(), "1".to_owned())];
        assert_eq!(hash_key_values(&kvs), hash_key_values(&kvs));
    }
}
