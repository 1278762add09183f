//! Query Compiler (C5): typed Request Spec -> parameterized OLAP SQL.
//!
//! See [`compiler::compile`] for the entry point and [`spec::RequestSpec`]
//! for the typed input it consumes.

pub mod compiler;
pub mod cursor;
pub mod param;
pub mod spec;

pub use compiler::{compile, compile_offset_chunk, build_filter_clauses, Builder, CompiledQuery};
pub use param::ParamValue;
pub use spec::{
    DateRange, Filters, GroupByDim, Metric, Pagination, Range, RequestSpec, Sort, SortDirection, Table,
};
