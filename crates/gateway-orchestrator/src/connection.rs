//! Connection/Edge/PageInfo envelope and the two row shapes it carries
//! (raw scan rows vs. dynamic aggregation rows).

use std::collections::BTreeMap;

use gateway_compiler::cursor::{encode_aggregation_cursor, encode_scan_cursor};
use gateway_compiler::{GroupByDim, RequestSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One column value in an aggregation row. Aggregation results have no
/// fixed schema — their shape depends on the request's own `groupBy`/
/// `metrics` selection — so each cell keeps its native JSON type rather
/// than being stringified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateValue {
    /// An unsigned integer cell (most grouping keys, `count()`).
    U64(u64),
    /// A floating-point cell (`avg`, `quantile`, fee/compute-unit sums).
    F64(f64),
    /// A string cell (protocol, program id, instruction type, date bucket).
    String(String),
    /// A boolean cell.
    Bool(bool),
    /// A missing or null cell.
    Null,
}

fn aggregate_value_from_json(value: &Value) -> AggregateValue {
    match value {
        Value::Null => AggregateValue::Null,
        Value::Bool(b) => AggregateValue::Bool(*b),
        Value::Number(n) => n.as_u64().map_or_else(|| AggregateValue::F64(n.as_f64().unwrap_or(0.0)), AggregateValue::U64),
        Value::String(s) => AggregateValue::String(s.clone()),
        other => AggregateValue::String(other.to_string()),
    }
}

/// A dynamically-shaped aggregation result row: one cell per requested
/// group-by dimension and metric, keyed by column alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRow(pub BTreeMap<String, AggregateValue>);

impl AggregationRow {
    fn from_json(row: &Value) -> Self {
        let map = row.as_object().into_iter().flatten().map(|(k, v)| (k.clone(), aggregate_value_from_json(v))).collect();
        Self(map)
    }
}

/// The two shapes a result row can take, depending on whether the
/// originating request was an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// A raw transaction row, as projected by the scan column list.
    Scan(Value),
    /// A dynamically-shaped aggregation row.
    Aggregation(AggregationRow),
}

/// One page edge: a node plus the opaque cursor positioned at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// The row itself.
    pub node: Node,
    /// Opaque cursor resuming immediately after (or before, for backward
    /// pagination) this row.
    pub cursor: String,
}

/// Forward/backward pagination metadata for a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Whether a `limit + 1`'th row came back, i.e. more rows exist past this page.
    pub has_next_page: bool,
    /// Whether the request supplied a `before` cursor (spec §4.8 edge construction rule).
    pub has_previous_page: bool,
    /// The first edge's cursor, if any.
    pub start_cursor: Option<String>,
    /// The last edge's cursor, if any.
    pub end_cursor: Option<String>,
}

/// One page of results plus pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Page edges, in warehouse-returned order, truncated to the requested limit.
    pub edges: Vec<Edge>,
    /// The edges' nodes, exposed directly for callers that don't need cursors.
    pub nodes: Vec<Node>,
    /// Pagination metadata for this page.
    pub page_info: PageInfo,
    /// Total matching row count, when cheaply known. Never computed by
    /// this gateway today (would cost a second warehouse round trip per
    /// request), so always `None`.
    pub total_count: Option<u64>,
}

fn json_value_to_cursor_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn scan_cursor_for_row(row: &Value) -> Option<String> {
    let slot = row.get("slot")?.as_u64()?;
    let signature = row.get("signature")?.as_str()?;
    Some(encode_scan_cursor(slot, signature))
}

fn aggregation_cursor_for_row(row: &Value, group_by: &[GroupByDim]) -> String {
    let key_values: Vec<(String, String)> =
        group_by.iter().map(|dim| (dim.alias().to_owned(), json_value_to_cursor_string(row.get(dim.alias()).unwrap_or(&Value::Null)))).collect();
    encode_aggregation_cursor(&key_values)
}

/// Build a [`Connection`] from the warehouse's raw result rows.
///
/// `rows` may contain up to `limit + 1` entries when the compiler
/// over-fetched to detect a next page; the `limit + 1`'th row is dropped
/// from the output and only used to set `hasNextPage`.
#[must_use]
pub fn build_connection(spec: &RequestSpec, rows: Vec<Value>, limit: u32) -> Connection {
    let limit = limit as usize;
    let has_next_page = rows.len() > limit;
    let page_rows: Vec<Value> = rows.into_iter().take(limit).collect();
    let has_previous_page = spec.pagination.before.is_some();

    let edges: Vec<Edge> = if spec.is_aggregation() {
        page_rows.iter().map(|row| Edge { cursor: aggregation_cursor_for_row(row, &spec.group_by), node: Node::Aggregation(AggregationRow::from_json(row)) }).collect()
    } else {
        page_rows.iter().filter_map(|row| scan_cursor_for_row(row).map(|cursor| Edge { cursor, node: Node::Scan(row.clone()) })).collect()
    };

    let start_cursor = edges.first().map(|e| e.cursor.clone());
    let end_cursor = edges.last().map(|e| e.cursor.clone());
    let nodes = edges.iter().map(|e| e.node.clone()).collect();

    Connection { edges, nodes, page_info: PageInfo { has_next_page, has_previous_page, start_cursor, end_cursor }, total_count: None }
}
