//! Named, typed OLAP query parameters.
//!
//! Every value the compiler binds into a query travels as a
//! [`ParamValue`], never as an inlined SQL literal (spec §6: "Inlining
//! user data into SQL text is forbidden"). [`ParamValue::clickhouse_type`]
//! supplies the `{name:Type}` placeholder's type tag.

use serde::Serialize;

/// A single bound parameter value, tagged with enough type information to
/// emit a ClickHouse `{name:Type}` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// `{name:String}`.
    Str(String),
    /// `{name:UInt64}`.
    U64(u64),
    /// `{name:UInt8}` (ClickHouse has no native bool; `0`/`1` round-trips).
    Bool(bool),
    /// `{name:Array(String)}`.
    StrArray(Vec<String>),
}

impl ParamValue {
    /// The ClickHouse type tag for this value's placeholder.
    #[must_use]
    pub const fn clickhouse_type(&self) -> &'static str {
        match self {
            Self::Str(_) => "String",
            Self::U64(_) => "UInt64",
            Self::Bool(_) => "UInt8",
            Self::StrArray(_) => "Array(String)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_match_clickhouse_placeholder_conventions() {
        assert_eq!(ParamValue::Str("x".into()).clickhouse_type(), "String");
        assert_eq!(ParamValue::U64(1).clickhouse_type(), "UInt64");
        assert_eq!(ParamValue::Bool(true).clickhouse_type(), "UInt8");
        assert_eq!(ParamValue::StrArray(vec![]).clickhouse_type(), "Array(String)");
    }
}
