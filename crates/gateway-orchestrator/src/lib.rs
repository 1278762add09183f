//! Request Orchestrator (C8): glues query compilation (C5), complexity
//! estimation (C6), admission control (C7), the two-tier cache (C4) and
//! the warehouse pool (C2) into the one typed-query pipeline described in
//! spec §4.8.
//!
//! [`Orchestrator`] holds every component a request needs; [`orchestrate`]
//! runs one [`gateway_compiler::RequestSpec`] through the full state
//! machine and [`execute_passthrough_sql`] runs the validated free-text
//! SQL escape hatch (spec §4.1) that bypasses it entirely.

pub mod config;
pub mod connection;
pub mod pipeline;

pub use config::OrchestratorConfig;
pub use connection::{build_connection, AggregateValue, AggregationRow, Connection, Edge, Node, PageInfo};
pub use pipeline::{orchestrate, execute_passthrough_sql, AdmissionProfile, Orchestrator};
