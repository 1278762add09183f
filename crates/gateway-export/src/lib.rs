//! Export Job Engine (C9): durable job queue, chunked streaming export to
//! compressed files, disk-pressure eviction.
//!
//! [`ExportEngine`] is the single entry point the orchestrator (or a
//! background dispatcher reading from the same [`gateway_store::SharedStore`]
//! queue) talks to: [`ExportEngine::submit`] enqueues, [`ExportEngine::process`]
//! drains one job under bounded concurrency, [`ExportEngine::status`] reads
//! the durable record, and [`spawn_reaper`] starts the hourly expiration
//! sweep.

pub mod config;
pub mod engine;
pub mod eviction;
pub mod format;
pub mod job;

pub use config::ExportConfig;
pub use engine::{spawn_reaper, ExportEngine};
pub use format::ExportFormat;
pub use job::{ExportJob, JobStatus};
