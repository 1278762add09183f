//! Disk-pressure management for the export root (spec §4.9).
//!
//! Grounded on `fraiseql-files::storage`'s module boundary: a
//! `StorageBackend`-style trait the rest of the crate only ever sees as
//! "the place exports live", behind which this module does plain
//! filesystem walks rather than anything warehouse- or cache-specific.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use gateway_error::{GatewayError, Result};
use gateway_store::SharedStore;
use tracing::{info, warn};

use crate::config::ExportConfig;
use crate::job::{ExportJob, JobStatus};

fn io_error(message: impl std::fmt::Display) -> GatewayError {
    GatewayError::ExportJobCreationError { message: message.to_string() }
}

/// Recursively sum the size in bytes of every regular file under `root`.
///
/// # Errors
///
/// Returns [`GatewayError::ExportJobCreationError`] if `root` cannot be read.
pub fn total_dir_size(root: &Path) -> Result<u64> {
    if !root.exists() {
        return Ok(0);
    }
    let mut total = 0u64;
    let mut stack = vec![root.to_owned()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let file_type = entry.file_type().map_err(io_error)?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                total += entry.metadata().map_err(io_error)?.len();
            }
        }
    }
    Ok(total)
}

/// Free space available on the filesystem backing `root`, in bytes.
///
/// # Errors
///
/// Returns [`GatewayError::ExportJobCreationError`] if the filesystem
/// cannot be statted (e.g. `root`'s parent does not exist yet).
pub fn available_space(root: &Path) -> Result<u64> {
    let probe = if root.exists() { root.to_owned() } else { root.parent().unwrap_or(root).to_owned() };
    fs2::available_space(&probe).map_err(io_error)
}

struct DatedFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

fn list_files_by_mtime(root: &Path) -> Result<Vec<DatedFile>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    let mut stack = vec![root.to_owned()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let file_type = entry.file_type().map_err(io_error)?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                let metadata = entry.metadata().map_err(io_error)?;
                files.push(DatedFile {
                    path: entry.path(),
                    modified: metadata.modified().map_err(io_error)?,
                    size: metadata.len(),
                });
            }
        }
    }
    files.sort_by_key(|f| f.modified);
    Ok(files)
}

/// FIFO eviction: delete the oldest files under `config.dir` until the
/// directory size drops below `config.eviction_target_bytes()` (spec
/// §4.9: "delete oldest-first until directory size < 0.8 x
/// maxTotalSizeGB").
///
/// # Errors
///
/// Returns [`GatewayError::ExportJobCreationError`] on any filesystem failure.
pub fn evict_fifo(config: &ExportConfig) -> Result<u64> {
    let target = config.eviction_target_bytes();
    let mut current = total_dir_size(&config.dir)?;
    if current < target {
        return Ok(0);
    }

    let files = list_files_by_mtime(&config.dir)?;
    let mut evicted = 0u64;
    for file in files {
        if current < target {
            break;
        }
        if std::fs::remove_file(&file.path).is_ok() {
            current = current.saturating_sub(file.size);
            evicted += file.size;
        } else {
            warn!(path = %file.path.display(), "failed to remove file during FIFO eviction");
        }
    }
    info!(evicted_bytes = evicted, remaining_bytes = current, "FIFO eviction pass complete");
    Ok(evicted)
}

/// Hourly reaper: remove any job directory older than its retention
/// threshold (spec §4.9: "any job directory whose mtime is older than
/// expirationHours ... is removed recursively"; FAILED jobs instead use
/// `config.failed_retention`, "retained 7 days for inspection").
///
/// Each directory's id is looked up in `store` to find its job record.
/// A directory with no matching record (or one `store` can't currently
/// reach) is treated as completed/expired rather than held forever, since
/// a durable job record outliving its own export files would indicate a
/// bug, not an in-progress job.
///
/// # Errors
///
/// Returns [`GatewayError::ExportJobCreationError`] on any filesystem failure.
pub async fn reap_expired(config: &ExportConfig, store: &Arc<dyn SharedStore>) -> Result<u64> {
    if !config.dir.exists() {
        return Ok(0);
    }
    let expiration_cutoff = std::time::Duration::from_secs(config.expiration_hours * 3600);
    let now = SystemTime::now();
    let mut removed = 0u64;
    for entry in std::fs::read_dir(&config.dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if !entry.file_type().map_err(io_error)?.is_dir() {
            continue;
        }
        let modified = entry.metadata().map_err(io_error)?.modified().map_err(io_error)?;
        let age = now.duration_since(modified).unwrap_or_default();

        let id = entry.file_name().to_string_lossy().into_owned();
        let job = ExportJob::load(store, &id).await.ok().flatten();
        let cutoff = match job.as_ref().map(|j| j.status) {
            Some(JobStatus::Failed) => config.failed_retention,
            _ => expiration_cutoff,
        };

        if age > cutoff {
            std::fs::remove_dir_all(entry.path()).map_err(io_error)?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!(removed_dirs = removed, "export reaper removed expired job directories");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn total_dir_size_sums_nested_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("job-1")).expect("mkdir");
        let mut f = std::fs::File::create(dir.path().join("job-1/export.csv.gz")).expect("create");
        f.write_all(b"0123456789").expect("write");

        assert_eq!(total_dir_size(dir.path()).expect("sizes"), 10);
    }

    #[test]
    fn total_dir_size_of_missing_root_is_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(total_dir_size(&dir.path().join("does-not-exist")).expect("sizes"), 0);
    }

    #[test]
    fn eviction_is_a_no_op_under_the_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ExportConfig { dir: dir.path().to_owned(), max_total_size_gb: 100, ..ExportConfig::default() };
        assert_eq!(evict_fifo(&config).expect("eviction runs"), 0);
    }

    fn age_dir(dir: &Path, seconds_old: u64) {
        let old_time = SystemTime::now() - std::time::Duration::from_secs(seconds_old);
        let file_time = filetime::FileTime::from_system_time(old_time);
        filetime::set_file_mtime(dir, file_time).expect("set mtime");
    }

    #[tokio::test]
    async fn reaper_removes_directories_with_no_job_record_older_than_expiration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job_dir = dir.path().join("old-job");
        std::fs::create_dir_all(&job_dir).expect("mkdir");
        age_dir(&job_dir, 999_999);

        let config = ExportConfig { dir: dir.path().to_owned(), expiration_hours: 1, ..ExportConfig::default() };
        let store: Arc<dyn SharedStore> = Arc::new(gateway_store::InProcessStore::new());
        let removed = reap_expired(&config, &store).await.expect("reap succeeds");
        assert_eq!(removed, 1);
        assert!(!job_dir.exists());
    }

    #[tokio::test]
    async fn reaper_retains_a_failed_job_past_expiration_until_failed_retention_elapses() {
        use crate::format::ExportFormat;
        use gateway_compiler::{Filters, RequestSpec, Table};

        let dir = tempfile::tempdir().expect("tempdir");
        let job_dir = dir.path().join("failed-job");
        std::fs::create_dir_all(&job_dir).expect("mkdir");
        // Older than expiration_hours but well within failed_retention.
        age_dir(&job_dir, 2 * 3600);

        let store: Arc<dyn SharedStore> = Arc::new(gateway_store::InProcessStore::new());
        let spec = RequestSpec {
            table: Table::Transactions,
            filters: Filters::default(),
            group_by: vec![],
            metrics: vec![],
            sort: None,
            pagination: gateway_compiler::Pagination::default(),
        };
        let mut job = ExportJob::new("failed-job".into(), spec, ExportFormat::Csv, chrono::Utc::now());
        job.status = JobStatus::Failed;
        job.error = Some("exhausted retry budget".into());
        job.save(&store).await.expect("save succeeds");

        let config = ExportConfig {
            dir: dir.path().to_owned(),
            expiration_hours: 1,
            failed_retention: std::time::Duration::from_secs(7 * 24 * 3600),
            ..ExportConfig::default()
        };
        let removed = reap_expired(&config, &store).await.expect("reap succeeds");
        assert_eq!(removed, 0, "a FAILED job must survive past expiration_hours");
        assert!(job_dir.exists());
    }
}
