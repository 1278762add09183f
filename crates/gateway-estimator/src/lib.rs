//! Complexity Estimator (C6): a fast bounded count probe plus a cost
//! formula that feeds both admission (C7) and the OLAP timeout tier (C2).
//!
//! Classifies a request by running a time-boxed count probe and attaching a
//! numeric cost expectation to it, in the same classify-then-score shape
//! used elsewhere in this workspace for static cost analysis — generalized
//! here from schema inspection to a runtime count probe.

use gateway_compiler::{Filters, GroupByDim, Metric, Table, build_filter_clauses};
use gateway_error::Result;
use gateway_wire::WarehousePool;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Conservative row-count fallback used when the count probe times out or
/// errors (spec §4.6 step 2).
pub const FALLBACK_ROW_ESTIMATE: u64 = 1_000_000;

/// The count probe's own hard deadline (spec §5 "Timeouts": "count probe 1s").
const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// `{score, estimatedRows, baseCost, groupByMultiplier, aggregationCost, recommendations[]}` (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityRecord {
    /// `baseCost * groupByMultiplier + aggregationCost`, rounded to 2 decimals.
    pub score: f64,
    /// The count probe's result, or [`FALLBACK_ROW_ESTIMATE`] on timeout/error.
    pub estimated_rows: u64,
    /// `estimatedRows / 10_000`.
    pub base_cost: f64,
    /// `2 ^ |groupBy|`.
    pub group_by_multiplier: f64,
    /// `baseCost * 0.1 * |metrics|`.
    pub aggregation_cost: f64,
    /// Advisory strings surfaced to the caller on complexity rejection.
    pub recommendations: Vec<String>,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Run the bounded count probe: `SELECT count() FROM <table> <where>
/// SETTINGS max_execution_time=1` (spec §4.6 step 2).
///
/// Falls back to [`FALLBACK_ROW_ESTIMATE`] on any timeout or engine error
/// rather than propagating — the estimator must always produce a record.
async fn probe_row_count(pool: &WarehousePool, table: Table, filters: &Filters) -> u64 {
    let builder = match build_filter_clauses(table, filters) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "complexity probe filter compilation failed, using conservative estimate");
            return FALLBACK_ROW_ESTIMATE;
        }
    };
    let where_sql = if builder.wheres.is_empty() { String::new() } else { format!(" WHERE {}", builder.wheres.join(" AND ")) };
    let sql = format!("SELECT count() AS row_count FROM {} {where_sql}", table.as_str());

    let params: Vec<(String, serde_json::Value)> = builder
        .params
        .iter()
        .map(|(name, value)| (name.clone(), serde_json::to_value(value).unwrap_or(serde_json::Value::Null)))
        .collect();

    match pool.query_with_params_and_timeout(&sql, &params, PROBE_TIMEOUT).await {
        Ok(rows) => rows
            .first()
            .and_then(|r| r.get("row_count"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(FALLBACK_ROW_ESTIMATE),
        Err(e) => {
            warn!(error = %e, "complexity count probe timed out or failed, using conservative estimate");
            FALLBACK_ROW_ESTIMATE
        }
    }
}

/// Build recommendations per spec §4.6 step 4.
fn recommendations_for(estimated_rows: u64, score: f64, group_by: &[GroupByDim], filters: &Filters) -> Vec<String> {
    let mut recs = Vec::new();
    if estimated_rows > 5_000_000 && filters.signatures.is_empty() {
        recs.push("narrow filters or paginate".to_owned());
    }
    if score > 1000.0 {
        recs.push("use export".to_owned());
    }
    if group_by.len() > 3 {
        recs.push("reduce dimensions".to_owned());
    }
    recs
}

/// Compute the [`ComplexityRecord`] for a candidate request (spec §4.6
/// `calculate`, single entry point).
///
/// # Errors
///
/// Propagates [`gateway_compiler::compiler::build_filter_clauses`]
/// validation failures (e.g. `errorPattern` on `transactions`) — the
/// estimator reuses the exact same clause builder the compiler uses, so a
/// request that would fail to compile also fails to estimate.
pub async fn calculate(
    pool: &WarehousePool,
    table: Table,
    filters: &Filters,
    group_by: &[GroupByDim],
    metrics: &[Metric],
) -> Result<ComplexityRecord> {
    // Validate the filters compile before spending a round trip on the probe.
    build_filter_clauses(table, filters)?;

    let estimated_rows = probe_row_count(pool, table, filters).await;
    let base_cost = estimated_rows as f64 / 10_000.0;
    let group_by_multiplier = 2f64.powi(i32::try_from(group_by.len()).unwrap_or(i32::MAX));
    let aggregation_cost = base_cost * 0.1 * metrics.len() as f64;
    let score = round2(base_cost * group_by_multiplier + aggregation_cost);

    Ok(ComplexityRecord {
        score,
        estimated_rows,
        base_cost: round2(base_cost),
        group_by_multiplier,
        aggregation_cost: round2(aggregation_cost),
        recommendations: recommendations_for(estimated_rows, score, group_by, filters),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(estimated_rows: u64, group_by_len: usize, metrics_len: usize) -> ComplexityRecord {
        let base_cost = estimated_rows as f64 / 10_000.0;
        let group_by_multiplier = 2f64.powi(i32::try_from(group_by_len).unwrap());
        let aggregation_cost = base_cost * 0.1 * metrics_len as f64;
        let score = round2(base_cost * group_by_multiplier + aggregation_cost);
        ComplexityRecord {
            score,
            estimated_rows,
            base_cost: round2(base_cost),
            group_by_multiplier,
            aggregation_cost: round2(aggregation_cost),
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn score_formula_matches_specification() {
        // 100_000 rows, 2 group-by dims, 3 metrics.
        let r = record(100_000, 2, 3);
        assert_eq!(r.base_cost, 10.0);
        assert_eq!(r.group_by_multiplier, 4.0);
        assert_eq!(r.aggregation_cost, 3.0); // 10 * 0.1 * 3
        assert_eq!(r.score, 43.0); // 10*4 + 3
    }

    #[test]
    fn adding_a_group_by_dimension_strictly_increases_score_for_same_rows() {
        let without = record(100_000, 2, 1);
        let with_one_more = record(100_000, 3, 1);
        assert!(with_one_more.score > without.score, "complexity monotonicity (spec §8)");
    }

    #[test]
    fn recommendations_fire_on_broad_scan_without_signature_filter() {
        let filters = Filters::default();
        let recs = recommendations_for(6_000_000, 10.0, &[], &filters);
        assert!(recs.iter().any(|r| r == "narrow filters or paginate"));
    }

    #[test]
    fn broad_scan_recommendation_is_suppressed_by_a_signature_filter() {
        let mut filters = Filters::default();
        filters.signatures.insert("sig1".into());
        let recs = recommendations_for(6_000_000, 10.0, &[], &filters);
        assert!(!recs.iter().any(|r| r == "narrow filters or paginate"));
    }

    #[test]
    fn high_score_recommends_export() {
        let recs = recommendations_for(1_000, 1500.0, &[], &Filters::default());
        assert!(recs.iter().any(|r| r == "use export"));
    }

    #[test]
    fn many_dimensions_recommends_reducing_them() {
        let dims = vec![
            GroupByDim::Protocol,
            GroupByDim::Hour,
            GroupByDim::Date,
            GroupByDim::ProgramId,
        ];
        let recs = recommendations_for(1_000, 10.0, &dims, &Filters::default());
        assert!(recs.iter().any(|r| r == "reduce dimensions"));
    }

}
