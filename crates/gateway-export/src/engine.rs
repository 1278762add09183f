//! Export Job Engine entry points (spec §4.9): `submit`, the bounded-
//! concurrency `process` worker loop, `status`, `download_url`, and the
//! hourly reaper.
//!
//! Grounded on `federation::saga_executor`/`saga_recovery_manager`'s
//! pairing: a durable record advanced through explicit states by a worker
//! that retries under bounded backoff and never deletes evidence of a
//! failure, generalized here from saga steps to one job with N chunks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gateway_compiler::RequestSpec;
use gateway_error::{GatewayError, Result};
use gateway_store::SharedStore;
use gateway_wire::WarehousePool;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::eviction::{available_space, evict_fifo, total_dir_size};
use crate::format::{ChunkWriter, CsvWriter, ExportFormat, JsonlWriter};
use crate::job::{ExportJob, JobStatus};

/// The durable export job queue plus the bounded worker pool that drains it.
///
/// [`ExportEngine::submit`] only ever enqueues and returns; the actual
/// chunked streaming happens in [`ExportEngine::process`], which the
/// embedding gateway calls from `worker_count` background tasks (or
/// drives itself from a queue-pop loop — this crate does not assume a
/// particular queue transport beyond [`gateway_store::SharedStore`]).
pub struct ExportEngine {
    config: ExportConfig,
    store: Arc<dyn SharedStore>,
    pool: Arc<WarehousePool>,
    semaphore: Arc<Semaphore>,
}

fn creation_error(message: impl std::fmt::Display) -> GatewayError {
    GatewayError::ExportJobCreationError { message: message.to_string() }
}

impl ExportEngine {
    /// Build an export engine over `pool` (source of chunk queries) and
    /// `store` (the durable job queue), bounding concurrent [`Self::process`]
    /// calls to `config.worker_count`.
    #[must_use]
    pub fn new(config: ExportConfig, store: Arc<dyn SharedStore>, pool: Arc<WarehousePool>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_count));
        Self { config, store, pool, semaphore }
    }

    /// Submit a new export job for `spec` in the requested `format` (spec
    /// §4.9 `submit`).
    ///
    /// Validates free disk space, runs FIFO eviction if the export root is
    /// over its size ceiling, then persists a fresh [`ExportJob`] in
    /// `Pending` state and returns its id. Does not itself start
    /// processing — the caller (or a background dispatcher) calls
    /// [`Self::process`] with the returned job.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ExportJobCreationError`] if free disk space
    /// is below `config.min_free_space_gb` even after eviction, or if the
    /// job record cannot be persisted.
    pub async fn submit(&self, spec: RequestSpec, format: ExportFormat) -> Result<String> {
        let total = total_dir_size(&self.config.dir)?;
        if total > self.config.max_total_size_bytes() {
            info!(total_bytes = total, ceiling_bytes = self.config.max_total_size_bytes(), "export root over size ceiling, running FIFO eviction");
            evict_fifo(&self.config)?;
        }

        let free = available_space(&self.config.dir)?;
        if free < self.config.min_free_space_bytes() {
            return Err(creation_error(format!(
                "insufficient free disk space: {free} bytes available, {} required",
                self.config.min_free_space_bytes()
            )));
        }

        let id = Uuid::new_v4().to_string();
        let job = ExportJob::new(id.clone(), spec, format, Utc::now());
        job.save(&self.store).await?;
        info!(job_id = %id, "export job submitted");
        Ok(id)
    }

    /// Process one job end to end, streaming it in `chunk_size`-row
    /// offset-driven chunks to a compressed file (spec §4.9 `process`).
    ///
    /// Acquires a worker slot from the bounded semaphore before doing any
    /// I/O, so at most `config.worker_count` jobs stream concurrently
    /// regardless of how many callers invoke this at once. Retries the
    /// whole job up to `config.max_attempts` times under exponential
    /// backoff (`config.backoff_base * 2^attempt`) before marking it
    /// `Failed`; a partial output file from a failed attempt is left in
    /// place for inspection (spec §4.9 "do not delete partial file").
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ExportProcessingError`] if the job id is
    /// unknown. A chunk failure after exhausting retries is recorded on
    /// the job itself (status `Failed`) rather than returned here — the
    /// job record is the source of truth for outcome, not this call's
    /// `Result`.
    pub async fn process(&self, job_id: &str) -> Result<()> {
        let _permit = self.semaphore.acquire().await.map_err(|e| {
            GatewayError::ExportProcessingError { job_id: job_id.to_owned(), message: e.to_string() }
        })?;

        let Some(mut job) = ExportJob::load(&self.store, job_id).await? else {
            return Err(GatewayError::ExportProcessingError {
                job_id: job_id.to_owned(),
                message: "job not found".to_owned(),
            });
        };

        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        job.save(&self.store).await?;

        loop {
            job.attempts += 1;
            match self.run_once(&job).await {
                Ok((row_count, file_size, file_path)) => {
                    job.status = JobStatus::Completed;
                    job.row_count = row_count;
                    job.file_size = Some(file_size);
                    job.file_path = Some(file_path.clone());
                    job.download_url = Some(ExportJob::download_path(&job.id, &filename_for(&job)));
                    job.progress = 100;
                    job.completed_at = Some(Utc::now());
                    job.updated_at = Utc::now();
                    job.save(&self.store).await?;
                    info!(job_id = %job.id, row_count, file_size, "export job completed");
                    return Ok(());
                }
                Err(e) if job.attempts < self.config.max_attempts => {
                    let backoff = self.config.backoff_base * 2u32.pow(job.attempts - 1);
                    warn!(job_id = %job.id, attempt = job.attempts, error = %e, backoff_secs = backoff.as_secs(), "export chunk failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    job.completed_at = Some(Utc::now());
                    job.updated_at = Utc::now();
                    job.save(&self.store).await?;
                    warn!(job_id = %job.id, error = %e, "export job failed, retries exhausted");
                    return Ok(());
                }
            }
        }
    }

    async fn run_once(&self, job: &ExportJob) -> Result<(u64, u64, String)> {
        let job_dir = self.config.dir.join(&job.id);
        std::fs::create_dir_all(&job_dir)
            .map_err(|e| GatewayError::ExportProcessingError { job_id: job.id.clone(), message: e.to_string() })?;
        let filename = filename_for(job);
        let path: PathBuf = job_dir.join(&filename);

        let mut writer: Box<dyn ChunkWriter> = match job.format {
            ExportFormat::Csv => Box::new(CsvWriter::create(&job.id, &path)?),
            ExportFormat::Jsonl => Box::new(JsonlWriter::create(&job.id, &path)?),
            ExportFormat::Parquet => {
                #[cfg(feature = "parquet")]
                {
                    Box::new(crate::format::ParquetWriter::create(&job.id, &path)?)
                }
                #[cfg(not(feature = "parquet"))]
                {
                    return Err(GatewayError::ExportProcessingError {
                        job_id: job.id.clone(),
                        message: "parquet output requested but the `parquet` feature is disabled".to_owned(),
                    });
                }
            }
        };

        let mut offset = 0u64;
        let mut row_count = 0u64;
        loop {
            let compiled = gateway_compiler::compile_offset_chunk(&job.spec, offset, self.config.chunk_size)?;
            let params: Vec<(String, Value)> = compiled
                .params
                .iter()
                .map(|(name, value)| (name.clone(), serde_json::to_value(value).unwrap_or(Value::Null)))
                .collect();
            let rows = self.pool.query_with_params_and_timeout(&compiled.sql, &params, self.config.chunk_timeout).await?;
            let fetched = rows.len() as u64;
            writer.write(&job.id, &rows)?;
            row_count += fetched;
            offset += u64::from(self.config.chunk_size);

            let written = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if written > self.config.max_file_size_bytes() {
                return Err(GatewayError::ExportProcessingError {
                    job_id: job.id.clone(),
                    message: format!(
                        "output exceeded max_file_size_gb ({} bytes written, {} byte ceiling)",
                        written,
                        self.config.max_file_size_bytes()
                    ),
                });
            }

            // Total row count is unknown up front (a second count query
            // would cost exactly the round trip the chunking is meant to
            // spread out), so progress is a saturating step function over
            // chunks fetched rather than a true percentage of the whole.
            let chunks_fetched = offset / u64::from(self.config.chunk_size);
            let progress_estimate = if fetched < u64::from(self.config.chunk_size) {
                100
            } else {
                u8::try_from((chunks_fetched * 5).min(99)).unwrap_or(99)
            };
            self.report_progress(&job.id, progress_estimate).await;

            if fetched < u64::from(self.config.chunk_size) {
                break;
            }
        }

        writer.finish(&job.id)?;
        let file_size = std::fs::metadata(&path)
            .map_err(|e| GatewayError::ExportProcessingError { job_id: job.id.clone(), message: e.to_string() })?
            .len();
        Ok((row_count, file_size, path.display().to_string()))
    }

    async fn report_progress(&self, job_id: &str, progress: u8) {
        if let Ok(Some(mut job)) = ExportJob::load(&self.store, job_id).await {
            job.progress = progress;
            job.updated_at = Utc::now();
            let _ = job.save(&self.store).await;
        }
    }

    /// Look up a job's durable record merged with worker progress (spec
    /// §4.9 `status`). Since this crate persists progress directly onto
    /// the record rather than a separate in-memory worker table, this is
    /// just [`ExportJob::load`].
    ///
    /// # Errors
    ///
    /// Propagates [`GatewayError::CacheTier2Fail`] if the store is unreachable.
    pub async fn status(&self, job_id: &str) -> Result<Option<ExportJob>> {
        ExportJob::load(&self.store, job_id).await
    }

    /// Run one reaper pass: remove job directories past their retention
    /// threshold, FAILED jobs excepted until `config.failed_retention`
    /// elapses (spec §4.9 `reaper`).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ExportJobCreationError`] on filesystem failure.
    pub async fn reap(&self) -> Result<u64> {
        crate::eviction::reap_expired(&self.config, &self.store).await
    }

    /// Run one FIFO eviction pass, independent of a new submission (spec
    /// §4.9 `FIFO eviction`, usable from an operator-triggered sweep).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ExportJobCreationError`] on filesystem failure.
    pub fn evict(&self) -> Result<u64> {
        evict_fifo(&self.config)
    }
}

fn filename_for(job: &ExportJob) -> String {
    format!("export.{}.gz", job.format.extension())
}

/// Spawn the export engine's two recurring background tasks: the
/// bounded-concurrency chunk-failure retry lives inside [`ExportEngine::process`]
/// itself, but the hourly reaper needs its own ticker (spec §4.9
/// "reaper runs hourly").
pub fn spawn_reaper(engine: Arc<ExportEngine>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.reap().await {
                warn!(error = %e, "export reaper pass failed");
            }
        }
    })
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

    fn engine(dir: &std::path::Path) -> ExportEngine {
        let config = ExportConfig { dir: dir.to_owned(), ..ExportConfig::default() };
        let store: Arc<dyn SharedStore> = Arc::new(InProcessStore::new());
        let pool_config = gateway_wire::WarehouseConfig {
            urls: vec!["http://127.0.0.1:0".to_owned()],
            ..gateway_wire::WarehouseConfig::default()
        };
        let pool = Arc::new(WarehousePool::new(&pool_config).expect("pool construction is infallible for well-formed urls"));
        ExportEngine::new(config, store, pool)
    }

    #[tokio::test]
    async fn submit_persists_a_pending_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let id = engine.submit(sample_spec(), ExportFormat::Csv).await.expect("submit succeeds");
        let job = engine.status(&id).await.expect("status succeeds").expect("present");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
    }

    #[tokio::test]
    async fn status_of_unknown_job_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        assert!(engine.status("nonexistent").await.expect("status succeeds").is_none());
    }

    #[tokio::test]
    async fn process_of_unknown_job_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let err = engine.process("nonexistent").await.unwrap_err();
        assert!(matches!(err, GatewayError::ExportProcessingError { .. }));
    }
}
