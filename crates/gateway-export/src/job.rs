//! Durable export job records (spec §4.9).
//!
//! Grounded on `federation::saga_store`'s state-machine shape
//! (`SagaState`/`StepState` as `as_str`/`from_str`-round-tripping text
//! enums persisted alongside the entity they describe) generalized from
//! saga steps to export jobs, persisted here as a JSON blob in
//! [`gateway_store::SharedStore`] rather than a dedicated Postgres table
//! — this gateway's only durable store is the shared TTL store already
//! wired for the cache and admission controller.

use chrono::{DateTime, Utc};
use gateway_error::Result;
use gateway_store::SharedStore;
use serde::{Deserialize, Serialize};

use crate::format::ExportFormat;
use gateway_compiler::RequestSpec;

/// Export jobs are retained well past their own TTL relevance, so their
/// store key carries no expiry (`setex` is still used with a very long
/// TTL — the store abstraction has no `set`-without-expiry primitive,
/// and an export job record outliving 30 days serves no purpose anyway).
const JOB_RECORD_TTL_SECS: u64 = 30 * 24 * 3600;

/// Lifecycle state of an export job (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Enqueued, not yet picked up by a worker.
    Pending,
    /// A worker is actively streaming chunks.
    Processing,
    /// Finished successfully; `row_count`/`file_size`/`file_path` are set.
    Completed,
    /// Exhausted its retry budget; `error` is set.
    Failed,
}

/// A durable export job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    /// Opaque job id, also the job's directory name under `export.dir`.
    pub id: String,
    /// The request this job materializes.
    pub spec: RequestSpec,
    /// Requested output format.
    pub format: ExportFormat,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Number of attempts made so far (spec §4.9: "exponential backoff, 3 attempts").
    pub attempts: u32,
    /// Completion percentage, `[0, 100]`. Advances as chunks are written
    /// and never regresses within one attempt (spec §3 Export Job `progress`).
    pub progress: u8,
    /// Rows written so far (final count once `status == Completed`).
    pub row_count: u64,
    /// Output file size in bytes, set on completion.
    pub file_size: Option<u64>,
    /// Path to the compressed output file, set on completion.
    pub file_path: Option<String>,
    /// Opaque download path, set on completion (spec §4.9 `downloadUrl`).
    /// Signing/token verification is the transport layer's job; this
    /// crate only ever records the path component.
    pub download_url: Option<String>,
    /// Failure description, set on `Failed`.
    pub error: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    /// Build a freshly-submitted job in `Pending` state.
    #[must_use]
    pub fn new(id: String, spec: RequestSpec, format: ExportFormat, now: DateTime<Utc>) -> Self {
        Self {
            id,
            spec,
            format,
            status: JobStatus::Pending,
            attempts: 0,
            progress: 0,
            row_count: 0,
            file_size: None,
            file_path: None,
            download_url: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn store_key(id: &str) -> String {
        format!("export:job:{id}")
    }

    /// Persist this record to `store`.
    ///
    /// # Errors
    ///
    /// Propagates [`gateway_error::GatewayError::CacheTier2Fail`] if the store is unreachable.
    pub async fn save(&self, store: &std::sync::Arc<dyn SharedStore>) -> Result<()> {
        let encoded = serde_json::to_string(self).expect("ExportJob always serializes");
        store.setex(&Self::store_key(&self.id), &encoded, JOB_RECORD_TTL_SECS).await
    }

    /// Load a job record by id.
    ///
    /// # Errors
    ///
    /// Propagates [`gateway_error::GatewayError::CacheTier2Fail`] if the store is unreachable.
    pub async fn load(store: &std::sync::Arc<dyn SharedStore>, id: &str) -> Result<Option<Self>> {
        let Some(raw) = store.get(&Self::store_key(id)).await? else { return Ok(None) };
        Ok(serde_json::from_str(&raw).ok())
    }

    /// The opaque download path this job exposes once completed, derived
    /// from `id`/`filename` rather than stored denormalized (spec §4.9
    /// `downloadUrl(id, filename)`).
    #[must_use]
    pub fn download_path(id: &str, filename: &str) -> String {
        format!("/exports/{id}/{filename}")
    }
}

#[cfg(test)]
mod tests {
    use gateway_compiler::{Filters, Table};
    use gateway_store::InProcessStore;

    use super::*;

    fn sample_spec() -> RequestSpec {
        RequestSpec {
            table: Table::Transactions,
            filters: Filters::default(),
            group_by: vec![],
            metrics: vec![],
            sort: None,
            pagination: gateway_compiler::Pagination::default(),
        }
    }

    #[tokio::test]
    async fn job_round_trips_through_the_shared_store() {
        let store: std::sync::Arc<dyn SharedStore> = std::sync::Arc::new(InProcessStore::new());
        let job = ExportJob::new("job-1".into(), sample_spec(), ExportFormat::Csv, Utc::now());
        job.save(&store).await.expect("save succeeds");

        let loaded = ExportJob::load(&store, "job-1").await.expect("load succeeds").expect("present");
        assert_eq!(loaded.id, "job-1");
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.progress, 0);
    }

    #[tokio::test]
    async fn missing_job_loads_as_none() {
        let store: std::sync::Arc<dyn SharedStore> = std::sync::Arc::new(InProcessStore::new());
        assert!(ExportJob::load(&store, "nonexistent").await.expect("load succeeds").is_none());
    }

    #[test]
    fn download_path_is_derived_not_stored() {
        assert_eq!(ExportJob::download_path("job-1", "export.csv.gz"), "/exports/job-1/export.csv.gz");
    }
}
