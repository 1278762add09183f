//! Query security: the gateway's first line of defense (C1).
//!
//! Validates free-text SQL passthrough and the typed spec's derived
//! artifacts (table names, bound parameter values) before either reaches
//! the OLAP engine. The typed compiler path (`gateway-compiler`) never
//! needs this module's `validateReadOnly`/`sanitize` — those exist only
//! for the validated read-only SQL passthrough power-user surface. Every
//! path, typed or free-text, goes through [`sanitize_table_name`] and
//! [`validate_params`].
//!
//! # Defense in depth
//!
//! The typed compilation path makes direct SQL unnecessary for ordinary
//! clients, but the free-SQL passthrough exists for power users and must
//! survive this filter on its own: a destructive statement must never
//! reach the warehouse regardless of which path produced it.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// The two tables this gateway is permitted to query.
pub const WHITELISTED_TABLES: [&str; 2] = ["transactions", "failed_transactions"];

/// Destructive SQL keywords rejected as whole words, case-insensitively.
const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "MERGE",
    "GRANT", "REVOKE", "KILL", "OPTIMIZE", "ATTACH", "DETACH", "EXCHANGE", "RENAME", "SYSTEM",
    "SHOW", "DESCRIBE", "EXPLAIN",
];

const MAX_SQL_LENGTH: usize = 100_000;
const MAX_LIMIT: u64 = 10_000;

/// Outcome of [`validate_read_only`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// Whether the SQL passed every rule.
    pub valid: bool,
    /// The rule that failed, if any.
    pub reason: Option<String>,
}

impl Validation {
    fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()) }
    }
}

static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)\b").expect("static regex is valid"));

static SEMICOLON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(";").expect("static regex is valid"));

static PARAM_DROP_DELETE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i);\s*(DROP|DELETE|UPDATE|INSERT|ALTER|CREATE|TRUNCATE)\b")
        .expect("static regex is valid")
});
static PARAM_TAUTOLOGY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)'\s*OR\s*'1'\s*=\s*'1").expect("static regex is valid"));
static PARAM_UNION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)'\s*UNION\s*SELECT").expect("static regex is valid"));
static PARAM_BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*.*?\*/").expect("static regex is valid"));

static LINE_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\n]*").expect("static regex is valid"));
static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("static regex is valid"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex is valid"));

fn contains_whole_word(sql: &str, keyword: &str) -> bool {
    // Built per-keyword rather than once: the keyword set is small and
    // fixed, and `\b` word boundaries need the keyword escaped into the
    // pattern itself.
    let pattern = format!(r"(?i)\b{keyword}\b");
    Regex::new(&pattern).is_ok_and(|re| re.is_match(sql))
}

/// Validate that `sql` is read-only, single-statement, bounded, and free
/// of destructive keywords.
///
/// Rules are applied in order and the first failure is returned; callers
/// relying on `reason` to drive a user-facing message should treat it as
/// a single sentence, not a list.
#[must_use]
pub fn validate_read_only(sql: &str) -> Validation {
    let trimmed = sql.trim();

    // (a) non-empty
    if trimmed.is_empty() {
        return Validation::fail("query is empty");
    }

    // (b) normalized prefix is SELECT or WITH
    let upper_prefix: String = trimmed.chars().take(8).collect::<String>().to_uppercase();
    if !(upper_prefix.starts_with("SELECT") || upper_prefix.starts_with("WITH")) {
        return Validation::fail("query must start with SELECT or WITH");
    }

    // (c) no destructive keyword as a whole word
    for keyword in DESTRUCTIVE_KEYWORDS {
        if contains_whole_word(trimmed, keyword) {
            return Validation::fail(format!("destructive keyword '{keyword}' is not allowed"));
        }
    }

    // (d) length bound
    if trimmed.len() > MAX_SQL_LENGTH {
        return Validation::fail(format!("query exceeds maximum length of {MAX_SQL_LENGTH} characters"));
    }

    // (e) at most one terminating semicolon
    let semicolons = SEMICOLON_RE.find_iter(trimmed).count();
    if semicolons > 1 {
        return Validation::fail("multiple statements are not allowed");
    }

    // (f) must contain LIMIT N with N <= MAX_LIMIT
    match LIMIT_RE.captures(trimmed) {
        None => Validation::fail("query must include a LIMIT clause"),
        Some(caps) => {
            let n: u64 = caps[1].parse().unwrap_or(u64::MAX);
            if n > MAX_LIMIT {
                Validation::fail(format!("LIMIT {n} exceeds maximum of {MAX_LIMIT}"))
            } else {
                Validation::ok()
            }
        }
    }
}

/// Validate and normalize a target table name.
///
/// # Errors
///
/// Returns an error string if `table` is not one of
/// [`WHITELISTED_TABLES`].
pub fn sanitize_table_name(table: &str) -> Result<&'static str, String> {
    match table {
        "transactions" => Ok("transactions"),
        "failed_transactions" => Ok("failed_transactions"),
        other => Err(format!("table '{other}' is not whitelisted")),
    }
}

/// Validate a single bound parameter value, recursing into arrays.
///
/// Rejects strings containing a trailing destructive statement, a
/// tautology (`' OR '1'='1`), a UNION-based injection, a block comment, or
/// a line comment (`--`).
#[must_use]
pub fn validate_param_value(value: &Value) -> Validation {
    match value {
        Value::String(s) => {
            if PARAM_DROP_DELETE_RE.is_match(s) {
                return Validation::fail("parameter contains a statement terminator followed by a destructive keyword");
            }
            if PARAM_TAUTOLOGY_RE.is_match(s) {
                return Validation::fail("parameter contains a tautology pattern");
            }
            if PARAM_UNION_RE.is_match(s) {
                return Validation::fail("parameter contains a UNION SELECT pattern");
            }
            if PARAM_BLOCK_COMMENT_RE.is_match(s) {
                return Validation::fail("parameter contains a block comment");
            }
            if s.contains("--") {
                return Validation::fail("parameter contains a line comment marker");
            }
            Validation::ok()
        }
        Value::Array(items) => {
            for item in items {
                let result = validate_param_value(item);
                if !result.valid {
                    return result;
                }
            }
            Validation::ok()
        }
        _ => Validation::ok(),
    }
}

/// Validate every value in a named parameter map.
///
/// # Errors
///
/// Returns the first [`Validation`] failure encountered, tagged with the
/// offending parameter name.
pub fn validate_params(params: &serde_json::Map<String, Value>) -> Result<(), (String, Validation)> {
    for (name, value) in params {
        let result = validate_param_value(value);
        if !result.valid {
            return Err((name.clone(), result));
        }
    }
    Ok(())
}

/// Strip line and block comments from `sql` and collapse runs of
/// whitespace into single spaces.
#[must_use]
pub fn sanitize(sql: &str) -> String {
    let no_block_comments = BLOCK_COMMENT_RE.replace_all(sql, " ");
    let no_line_comments = LINE_COMMENT_RE.replace_all(&no_block_comments, " ");
    WHITESPACE_RE.replace_all(no_line_comments.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_simple_select_with_limit() {
        let v = validate_read_only("SELECT * FROM transactions LIMIT 100");
        assert!(v.valid, "{:?}", v.reason);
    }

    #[test]
    fn accepts_with_cte() {
        let v = validate_read_only("WITH t AS (SELECT 1) SELECT * FROM t LIMIT 10");
        assert!(v.valid, "{:?}", v.reason);
    }

    #[test]
    fn rejects_empty_query() {
        assert!(!validate_read_only("").valid);
        assert!(!validate_read_only("   ").valid);
    }

    #[test]
    fn rejects_non_select_prefix() {
        let v = validate_read_only("DELETE FROM transactions WHERE 1=1");
        assert!(!v.valid);
    }

    #[test]
    fn rejects_destructive_keyword_even_inside_select() {
        // Keyword appears as its own word deep in the query, not as the statement verb.
        let v = validate_read_only("SELECT * FROM transactions WHERE signature = 'DROP' LIMIT 10");
        assert!(!v.valid);
        assert!(v.reason.unwrap().contains("DROP"));
    }

    #[test]
    fn does_not_false_positive_on_keyword_substrings() {
        // "dropped_at" contains "drop" but not the whole word "DROP".
        let v = validate_read_only("SELECT dropped_at FROM transactions LIMIT 10");
        assert!(v.valid, "{:?}", v.reason);
    }

    #[test]
    fn rejects_multiple_statements() {
        let v = validate_read_only("SELECT 1 LIMIT 1; SELECT 2 LIMIT 1;");
        assert!(!v.valid);
    }

    #[test]
    fn allows_single_terminating_semicolon() {
        let v = validate_read_only("SELECT * FROM transactions LIMIT 10;");
        assert!(v.valid, "{:?}", v.reason);
    }

    #[test]
    fn requires_limit_clause() {
        let v = validate_read_only("SELECT * FROM transactions");
        assert!(!v.valid);
        assert!(v.reason.unwrap().contains("LIMIT"));
    }

    #[test]
    fn rejects_limit_above_ceiling() {
        let v = validate_read_only("SELECT * FROM transactions LIMIT 20000");
        assert!(!v.valid);
    }

    #[test]
    fn sanitize_table_name_accepts_whitelist_only() {
        assert_eq!(sanitize_table_name("transactions"), Ok("transactions"));
        assert_eq!(sanitize_table_name("failed_transactions"), Ok("failed_transactions"));
        assert!(sanitize_table_name("pg_shadow").is_err());
        assert!(sanitize_table_name("transactions; DROP TABLE users").is_err());
    }

    #[test]
    fn validate_params_rejects_injection_attempt() {
        let mut params = serde_json::Map::new();
        params.insert("signature".into(), json!("'; DROP TABLE transactions; --"));
        let result = validate_params(&params);
        assert!(result.is_err());
    }

    #[test]
    fn validate_params_rejects_tautology_and_union() {
        let mut params = serde_json::Map::new();
        params.insert("p".into(), json!("x' OR '1'='1"));
        assert!(validate_params(&params).is_err());

        let mut params2 = serde_json::Map::new();
        params2.insert("p".into(), json!("x' UNION SELECT password FROM users"));
        assert!(validate_params(&params2).is_err());
    }

    #[test]
    fn validate_params_checks_arrays_element_wise() {
        let mut params = serde_json::Map::new();
        params.insert("protocols".into(), json!(["pump_fun", "'; DROP TABLE x; --"]));
        assert!(validate_params(&params).is_err());
    }

    #[test]
    fn validate_params_allows_ordinary_values() {
        let mut params = serde_json::Map::new();
        params.insert("slot".into(), json!(12345));
        params.insert("protocols".into(), json!(["pump_fun", "raydium"]));
        assert!(validate_params(&params).is_ok());
    }

    #[test]
    fn sanitize_strips_comments_and_collapses_whitespace() {
        let sql = "SELECT  1 -- trailing comment\n  FROM /* block\ncomment */ t   LIMIT 1";
        let cleaned = sanitize(sql);
        assert!(!cleaned.contains("--"));
        assert!(!cleaned.contains("/*"));
        assert!(!cleaned.contains("  "));
    }

    proptest::proptest! {
        #[test]
        fn no_injection_attempt_ever_validates_as_benign(payload in "[a-zA-Z0-9 ]{0,20}") {
            // Benign alphanumeric payloads must never trip the injection heuristics.
            let mut params = serde_json::Map::new();
            params.insert("p".into(), json!(payload));
            prop_assert!(validate_params(&params).is_ok());
        }
    }
}
