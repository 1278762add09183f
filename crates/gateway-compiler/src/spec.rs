//! Typed Request Spec — the immutable, per-request input to the pipeline.
//!
//! Mirrors the data model (§3) and typed request inputs table (§6)
//! one-to-one: every filter, dimension, metric and sort field named
//! there has exactly one variant or field here. Nothing in this module
//! talks to the warehouse — it is pure data plus the one derived
//! predicate the rest of the pipeline needs, [`RequestSpec::is_aggregation`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The two tables this gateway is permitted to query (spec §3 Request Spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Successful transactions.
    Transactions,
    /// Transactions that failed on-chain, carrying `errorPattern`/`logMessage`.
    FailedTransactions,
}

impl Table {
    /// The literal whitelisted table name this variant compiles to.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::FailedTransactions => "failed_transactions",
        }
    }
}

/// An inclusive range filter; either bound may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Range<T> {
    /// Inclusive lower bound.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min: Option<T>,
    /// Inclusive upper bound.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max: Option<T>,
}

impl<T> Range<T> {
    /// A range with no bounds set — compiles to no predicate.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { min: None, max: None }
    }

    /// Whether either bound is present.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

/// `{start, end}` inclusive calendar-date range, `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    /// Inclusive start date, `YYYY-MM-DD`.
    pub start: String,
    /// Inclusive end date, `YYYY-MM-DD`.
    pub end: String,
}

/// All filterable fields of a Request Spec (spec §3, §6).
///
/// Every set-valued filter is unordered (`BTreeSet` so compilation is
/// deterministic and cache keys stable regardless of input order); every
/// range filter is inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filters {
    /// Exact transaction signatures.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub signatures: BTreeSet<String>,
    /// On-chain program ids.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub program_ids: BTreeSet<String>,
    /// Protocol identifiers (e.g. `"pump_fun"`).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub protocols: BTreeSet<String>,
    /// Instruction type identifiers.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub instruction_types: BTreeSet<String>,
    /// Inclusive calendar-date range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Inclusive slot range.
    #[serde(default, skip_serializing_if = "Range::is_unset")]
    pub slot_range: Range<u64>,
    /// Inclusive lamport fee range.
    #[serde(default, skip_serializing_if = "Range::is_unset")]
    pub fee_range: Range<u64>,
    /// Inclusive compute-unit range.
    #[serde(default, skip_serializing_if = "Range::is_unset")]
    pub compute_units_range: Range<u64>,
    /// Inclusive account-count range.
    #[serde(default, skip_serializing_if = "Range::is_unset")]
    pub accounts_count_range: Range<u32>,
    /// Only legal on `transactions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Substring match; only legal on `failed_transactions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_pattern: Option<String>,
    /// Substring match; only legal on `failed_transactions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

impl<T> Range<T> {
    fn is_unset(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Ordered group-by dimension, drawn from the §3 closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupByDim {
    /// Protocol identifier.
    Protocol,
    /// Hour-of-day bucket.
    Hour,
    /// Calendar date bucket.
    Date,
    /// Program id.
    ProgramId,
    /// Instruction type.
    InstructionType,
    /// ISO day of week (1=Monday..7=Sunday, ClickHouse `toDayOfWeek`).
    DayOfWeek,
    /// Start-of-week bucket.
    Week,
    /// Start-of-month bucket.
    Month,
}

impl GroupByDim {
    /// Column alias this dimension projects to (lowercased enum name,
    /// spec §4.5 step 3).
    #[must_use]
    pub const fn alias(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Hour => "hour",
            Self::Date => "date",
            Self::ProgramId => "program_id",
            Self::InstructionType => "instruction_type",
            Self::DayOfWeek => "day_of_week",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// ClickHouse expression this dimension projects (spec §4.5 step 3).
    #[must_use]
    pub const fn expression(self) -> &'static str {
        match self {
            Self::Protocol => "protocol_name",
            Self::Hour => "hour",
            Self::Date => "date",
            Self::ProgramId => "program_id",
            Self::InstructionType => "instruction_type",
            Self::DayOfWeek => "toDayOfWeek(toDate(date))",
            Self::Week => "toStartOfWeek(toDate(date))",
            Self::Month => "toStartOfMonth(toDate(date))",
        }
    }
}

/// An aggregation metric, drawn from the §3 closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Metric {
    /// `count()`.
    Count,
    /// `sum(fee)`.
    SumFee,
    /// `avg(fee)`.
    AvgFee,
    /// `min(fee)`.
    MinFee,
    /// `max(fee)`.
    MaxFee,
    /// `quantile(0.5)(fee)`.
    P50Fee,
    /// `quantile(0.95)(fee)`.
    P95Fee,
    /// `quantile(0.99)(fee)`.
    P99Fee,
    /// `sum(compute_units)`.
    SumComputeUnits,
    /// `avg(compute_units)`.
    AvgComputeUnits,
    /// `min(compute_units)`.
    MinComputeUnits,
    /// `max(compute_units)`.
    MaxComputeUnits,
    /// `quantile(0.5)(compute_units)`.
    P50ComputeUnits,
    /// `quantile(0.95)(compute_units)`.
    P95ComputeUnits,
    /// `quantile(0.99)(compute_units)`.
    P99ComputeUnits,
    /// `sum(accounts_count)`.
    SumAccountsCount,
    /// `avg(accounts_count)`.
    AvgAccountsCount,
}

impl Metric {
    /// Column alias (lowercased metric name stripped of underscores, spec
    /// §4.5 step 3), e.g. `AvgFee` -> `"avgfee"`.
    #[must_use]
    pub fn alias(self) -> String {
        format!("{self:?}").to_lowercase()
    }

    /// The ClickHouse aggregate expression this metric compiles to.
    #[must_use]
    pub const fn expression(self) -> &'static str {
        match self {
            Self::Count => "count()",
            Self::SumFee => "sum(fee)",
            Self::AvgFee => "avg(fee)",
            Self::MinFee => "min(fee)",
            Self::MaxFee => "max(fee)",
            Self::P50Fee => "quantile(0.5)(fee)",
            Self::P95Fee => "quantile(0.95)(fee)",
            Self::P99Fee => "quantile(0.99)(fee)",
            Self::SumComputeUnits => "sum(compute_units)",
            Self::AvgComputeUnits => "avg(compute_units)",
            Self::MinComputeUnits => "min(compute_units)",
            Self::MaxComputeUnits => "max(compute_units)",
            Self::P50ComputeUnits => "quantile(0.5)(compute_units)",
            Self::P95ComputeUnits => "quantile(0.95)(compute_units)",
            Self::P99ComputeUnits => "quantile(0.99)(compute_units)",
            Self::SumAccountsCount => "sum(accounts_count)",
            Self::AvgAccountsCount => "avg(accounts_count)",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Requested sort: an alias present in the compiled projection, plus
/// direction. Validated against the actual projection at compile time
/// since the legal field set depends on the request's own `groupBy`/
/// `metrics` selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    /// Column alias to order by (a scan column, group-by alias, or metric alias).
    pub field: String,
    /// Sort direction.
    pub direction: SortDirection,
}

/// Cursor-based pagination window (spec §3: exactly one of forward/reverse).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Pagination {
    /// Forward page size, `[1, 1000]`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first: Option<u32>,
    /// Backward page size, `[1, 1000]`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last: Option<u32>,
    /// Forward cursor: resume strictly after this opaque position.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub after: Option<String>,
    /// Backward cursor: resume strictly before this opaque position.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub before: Option<String>,
}

impl Pagination {
    /// The default scan page size when the caller supplies neither `first`
    /// nor `last`.
    pub const DEFAULT_FIRST: u32 = 100;
    /// Hard per-page cap (spec §3).
    pub const MAX_PAGE_SIZE: u32 = 1000;

    /// Whether the caller supplied an explicit forward or backward bound.
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.first.is_some() || self.last.is_some()
    }

    /// Whether this is a backward (`last`/`before`) page request.
    #[must_use]
    pub fn is_backward(&self) -> bool {
        self.last.is_some() || self.before.is_some()
    }

    /// The effective, clamped page size for this request.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.first.or(self.last).unwrap_or(Self::DEFAULT_FIRST).clamp(1, Self::MAX_PAGE_SIZE)
    }
}

/// The full, immutable Request Spec (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    /// The target table; any other value is a hard error upstream of this type.
    pub table: Table,
    /// Filter predicates.
    #[serde(default)]
    pub filters: Filters,
    /// Ordered group-by dimensions (duplicates forbidden, checked at compile time).
    #[serde(default)]
    pub group_by: Vec<GroupByDim>,
    /// Requested metrics.
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// Requested sort, if any.
    #[serde(default)]
    pub sort: Option<Sort>,
    /// Pagination window.
    #[serde(default)]
    pub pagination: Pagination,
}

impl RequestSpec {
    /// A request is an aggregation iff it carries a group-by dimension or a metric (spec §3 invariant).
    #[must_use]
    pub fn is_aggregation(&self) -> bool {
        !self.group_by.is_empty() || !self.metrics.is_empty()
    }
}
