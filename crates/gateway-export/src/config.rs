//! Export engine configuration (spec §4.9, §6).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the durable export job engine.
///
/// Mirrors `gateway-cache::config::CacheConfig`'s style: a `Default`
/// carrying the numeric defaults plus an eager `validate` the embedding
/// gateway runs at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Root directory exports are written under; each job gets
    /// `<dir>/<jobId>/export.<format>.gz`.
    pub dir: PathBuf,
    /// How long a completed job's directory is retained before the
    /// reaper removes it.
    ///
    /// Default: 24h.
    pub expiration_hours: u64,
    /// Minimum free space `submit` requires before accepting a new job.
    ///
    /// Default: 20 GB.
    pub min_free_space_gb: u64,
    /// Total export-root size above which FIFO eviction runs before a
    /// new job is accepted.
    ///
    /// Default: 100 GB.
    pub max_total_size_gb: u64,
    /// Per-job output file size ceiling; processing fails the job once
    /// exceeded rather than writing an unbounded file.
    ///
    /// Default: 5 GB.
    pub max_file_size_gb: u64,
    /// Fixed worker pool size bounding concurrent job processing.
    ///
    /// Default: 2.
    pub worker_count: usize,
    /// Row count fetched per OFFSET-driven chunk.
    ///
    /// Default: 50,000.
    pub chunk_size: u32,
    /// Per-chunk query deadline.
    ///
    /// Default: 600s.
    pub chunk_timeout: Duration,
    /// Exponential backoff base for job submission/chunk retries.
    ///
    /// Default: 2s.
    pub backoff_base: Duration,
    /// Maximum retry attempts before a job is marked FAILED.
    ///
    /// Default: 3.
    pub max_attempts: u32,
    /// How long a FAILED job's directory is retained for inspection
    /// before the reaper removes it, overriding `expiration_hours`.
    ///
    /// Default: 7 days.
    pub failed_retention: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./exports"),
            expiration_hours: 24,
            min_free_space_gb: 20,
            max_total_size_gb: 100,
            max_file_size_gb: 5,
            worker_count: 2,
            chunk_size: 50_000,
            chunk_timeout: Duration::from_secs(600),
            backoff_base: Duration::from_secs(2),
            max_attempts: 3,
            failed_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl ExportConfig {
    /// Eagerly validate the bounds a misconfigured deployment would
    /// otherwise only discover at the first export attempt.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("export.workerCount must be greater than zero".to_owned());
        }
        if self.chunk_size == 0 {
            return Err("export.chunkSize must be greater than zero".to_owned());
        }
        if self.max_attempts == 0 {
            return Err("export.maxAttempts must be greater than zero".to_owned());
        }
        if self.max_total_size_gb == 0 || self.min_free_space_gb == 0 {
            return Err("export size thresholds must be greater than zero".to_owned());
        }
        Ok(())
    }

    /// [`ExportConfig::max_total_size_gb`] in bytes.
    #[must_use]
    pub fn max_total_size_bytes(&self) -> u64 {
        self.max_total_size_gb * 1024 * 1024 * 1024
    }

    /// [`ExportConfig::min_free_space_gb`] in bytes.
    #[must_use]
    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_gb * 1024 * 1024 * 1024
    }

    /// [`ExportConfig::max_file_size_gb`] in bytes.
    #[must_use]
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_gb * 1024 * 1024 * 1024
    }

    /// FIFO eviction target: eviction runs until directory size drops
    /// below `0.8 * max_total_size_gb` (spec §4.9).
    #[must_use]
    pub fn eviction_target_bytes(&self) -> u64 {
        (self.max_total_size_bytes() as f64 * 0.8) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_specification() {
        let c = ExportConfig::default();
        assert_eq!(c.expiration_hours, 24);
        assert_eq!(c.min_free_space_gb, 20);
        assert_eq!(c.max_total_size_gb, 100);
        assert_eq!(c.max_file_size_gb, 5);
        assert_eq!(c.worker_count, 2);
        assert_eq!(c.chunk_size, 50_000);
        assert_eq!(c.backoff_base, Duration::from_secs(2));
        assert_eq!(c.max_attempts, 3);
    }

    #[test]
    fn eviction_target_is_eighty_percent_of_ceiling() {
        let c = ExportConfig { max_total_size_gb: 100, ..ExportConfig::default() };
        assert_eq!(c.eviction_target_bytes(), 80 * 1024 * 1024 * 1024);
    }

    #[test]
    fn rejects_zero_worker_count() {
        let c = ExportConfig { worker_count: 0, ..ExportConfig::default() };
        assert!(c.validate().is_err());
    }
}
