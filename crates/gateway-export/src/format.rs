//! Per-format chunk writers (spec §4.9.1 SUPPLEMENT).
//!
//! `original_source/` picks its on-disk serializer per format through a
//! small trait rather than a per-case function; generalized here as
//! [`ChunkWriter`], with each implementation wrapping a
//! [`flate2::write::GzEncoder`] since the export pipeline always gzips
//! regardless of inner format (spec §4.9 step 3).

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use gateway_error::{GatewayError, Result};
use serde_json::Value;

/// The warehouse-native output formats an export job may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    /// Comma-separated values, one header row then one row per record.
    Csv,
    /// Newline-delimited JSON, one object per line.
    Jsonl,
    /// Columnar Parquet, gated behind the `parquet` feature.
    Parquet,
}

impl ExportFormat {
    /// The file extension this format contributes before the `.gz` suffix.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
            Self::Parquet => "parquet",
        }
    }
}

/// Appends rows of a single export chunk to a compressed output file.
///
/// A fresh writer is opened once per job and fed every chunk in
/// sequence; [`ChunkWriter::finish`] flushes and closes the underlying
/// gzip stream.
pub trait ChunkWriter: Send {
    /// Append `rows` (already fetched from the warehouse) to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ExportProcessingError`] on any I/O or
    /// encoding failure. The caller supplies `job_id` only for the error
    /// message.
    fn write(&mut self, job_id: &str, rows: &[Value]) -> Result<()>;

    /// Flush and close the underlying stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ExportProcessingError`] if the final flush fails.
    fn finish(self: Box<Self>, job_id: &str) -> Result<()>;
}

fn processing_error(job_id: &str, message: impl std::fmt::Display) -> GatewayError {
    GatewayError::ExportProcessingError { job_id: job_id.to_owned(), message: message.to_string() }
}

fn sorted_keys(row: &Value) -> Vec<String> {
    match row.as_object() {
        Some(map) => {
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            keys
        }
        None => Vec::new(),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

fn value_to_csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_escape(s),
        other => csv_escape(&other.to_string()),
    }
}

/// CSV writer: the first chunk's row shape fixes the header row; later
/// chunks are expected to share it (the warehouse query never changes
/// projection mid-job).
pub struct CsvWriter {
    encoder: GzEncoder<std::fs::File>,
    header: Option<Vec<String>>,
}

impl CsvWriter {
    /// Open a gzip-compressed CSV writer at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ExportProcessingError`] if `path` cannot be created.
    pub fn create(job_id: &str, path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::create(path).map_err(|e| processing_error(job_id, e))?;
        Ok(Self { encoder: GzEncoder::new(file, Compression::default()), header: None })
    }
}

impl ChunkWriter for CsvWriter {
    fn write(&mut self, job_id: &str, rows: &[Value]) -> Result<()> {
        for row in rows {
            let keys = match &self.header {
                Some(h) => h.clone(),
                None => {
                    let keys = sorted_keys(row);
                    writeln!(self.encoder, "{}", keys.join(",")).map_err(|e| processing_error(job_id, e))?;
                    self.header = Some(keys.clone());
                    keys
                }
            };
            let fields: Vec<String> =
                keys.iter().map(|k| row.get(k).map(value_to_csv_field).unwrap_or_default()).collect();
            writeln!(self.encoder, "{}", fields.join(",")).map_err(|e| processing_error(job_id, e))?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>, job_id: &str) -> Result<()> {
        self.encoder.finish().map_err(|e| processing_error(job_id, e))?;
        Ok(())
    }
}

/// Newline-delimited JSON writer: each row is written as-received, one
/// object per line, since the warehouse already emits `JSONEachRow`.
pub struct JsonlWriter {
    encoder: GzEncoder<std::fs::File>,
}

impl JsonlWriter {
    /// Open a gzip-compressed JSONL writer at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ExportProcessingError`] if `path` cannot be created.
    pub fn create(job_id: &str, path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::create(path).map_err(|e| processing_error(job_id, e))?;
        Ok(Self { encoder: GzEncoder::new(file, Compression::default()) })
    }
}

impl ChunkWriter for JsonlWriter {
    fn write(&mut self, job_id: &str, rows: &[Value]) -> Result<()> {
        for row in rows {
            serde_json::to_writer(&mut self.encoder, row).map_err(|e| processing_error(job_id, e))?;
            self.encoder.write_all(b"\n").map_err(|e| processing_error(job_id, e))?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>, job_id: &str) -> Result<()> {
        self.encoder.finish().map_err(|e| processing_error(job_id, e))?;
        Ok(())
    }
}

#[cfg(feature = "parquet")]
mod parquet_writer {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;

    use super::{processing_error, sorted_keys, ChunkWriter, GatewayError, Result, Value};

    /// Parquet writer gated behind the `parquet` feature.
    ///
    /// Every value is written as its string representation — a
    /// deliberate simplification over a fully-typed Arrow schema, since
    /// the gateway's row shapes vary per request (scan vs. aggregation,
    /// arbitrary `groupBy`/`metrics` combinations) and inferring a
    /// precise Arrow schema per export job is future work, not required
    /// by any deployment shipping today.
    pub struct ParquetWriter {
        writer: Option<ArrowWriter<std::fs::File>>,
        path: std::path::PathBuf,
    }

    impl ParquetWriter {
        /// Open a Parquet writer at `path`. The underlying file is not
        /// gzip-wrapped (Parquet already compresses internally), unlike
        /// [`super::CsvWriter`]/[`super::JsonlWriter`].
        ///
        /// # Errors
        ///
        /// Returns [`GatewayError::ExportProcessingError`] if `path` cannot be created.
        pub fn create(_job_id: &str, path: &std::path::Path) -> Result<Self> {
            Ok(Self { writer: None, path: path.to_owned() })
        }
    }

    impl ChunkWriter for ParquetWriter {
        fn write(&mut self, job_id: &str, rows: &[Value]) -> Result<()> {
            if rows.is_empty() {
                return Ok(());
            }
            if self.writer.is_none() {
                let keys = sorted_keys(&rows[0]);
                let fields: Vec<Field> = keys.iter().map(|k| Field::new(k, DataType::Utf8, true)).collect();
                let schema = Arc::new(Schema::new(fields));
                let file = std::fs::File::create(&self.path).map_err(|e| processing_error(job_id, e))?;
                let props = WriterProperties::builder().build();
                self.writer = Some(
                    ArrowWriter::try_new(file, schema, Some(props))
                        .map_err(|e| processing_error(job_id, e))?,
                );
            }
            let writer = self.writer.as_mut().expect("initialized above");
            let keys = sorted_keys(&rows[0]);
            let columns: Vec<ArrayRef> = keys
                .iter()
                .map(|k| {
                    let values: Vec<Option<String>> =
                        rows.iter().map(|r| r.get(k).map(|v| v.to_string())).collect();
                    Arc::new(StringArray::from(values)) as ArrayRef
                })
                .collect();
            let schema = writer.schema().clone();
            let batch = RecordBatch::try_new(schema, columns).map_err(|e| processing_error(job_id, e))?;
            writer.write(&batch).map_err(|e| processing_error(job_id, e))?;
            Ok(())
        }

        fn finish(self: Box<Self>, job_id: &str) -> Result<()> {
            if let Some(writer) = self.writer {
                writer.close().map_err(|e| processing_error(job_id, e))?;
            }
            Ok(())
        }
    }
}

#[cfg(feature = "parquet")]
pub use parquet_writer::ParquetWriter;
