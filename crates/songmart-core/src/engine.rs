//! Compute engine capability.
//!
//! The core's transforms are declarative operations over record sets;
//! everything that touches storage or schedules bulk work goes through
//! the [`LakeEngine`] trait:
//!
//! - `load_ndjson` turns a glob pattern into a typed record set.
//! - `dataframe_from_batches` lifts rows materialized in Rust back into
//!   the engine.
//! - `overwrite_partitioned` persists a record set to hive-partitioned
//!   Parquet under a full-overwrite policy.
//!
//! The only implementation is [`DataFusionEngine`], a thin wrapper
//! around a DataFusion `SessionContext`. The engine decides how to
//! partition and parallelize work across its own task units; the core
//! never manages threads or locks itself.

use std::path::Path;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::datasource::MemTable;
use datafusion::error::DataFusionError;
use datafusion::prelude::{DataFrame, NdJsonReadOptions, SessionConfig, SessionContext};
use snafu::{prelude::*, Backtrace};
use tracing::{debug, warn};

use crate::config::{EtlConfig, StorageCredentials};

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the compute engine.
///
/// All of these are fatal for the current run; the core has no retry
/// logic of its own.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    /// Loading a record set from a path pattern failed.
    #[snafu(display("Failed to load records matching {pattern}: {source}"))]
    Load {
        /// The glob pattern being loaded.
        pattern: String,
        /// Underlying engine error.
        source: DataFusionError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Registering in-memory batches with the engine failed.
    #[snafu(display("Failed to materialize in-memory record set: {source}"))]
    Materialize {
        /// Underlying engine error.
        source: DataFusionError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Removing a previous table incarnation failed.
    #[snafu(display("Failed to remove stale table contents at {path}: {source}"))]
    RemoveStale {
        /// The target directory being cleared.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The target path is not representable as UTF-8.
    #[snafu(display("Table target path is not valid UTF-8: {path}"))]
    InvalidTargetPath {
        /// Lossy rendering of the offending path.
        path: String,
    },

    /// Writing a table to partitioned Parquet failed.
    #[snafu(display("Failed to write table at {path}: {source}"))]
    Write {
        /// The target directory being written.
        path: String,
        /// Underlying engine error.
        source: DataFusionError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

/// Bulk compute capability injected into the pipeline.
#[async_trait]
pub trait LakeEngine: Send + Sync {
    /// Load the records matching `pattern` as a record set with the
    /// given canonical schema.
    ///
    /// A pattern whose prefix does not exist (or matches no files)
    /// yields an empty record set, not an error; downstream builders
    /// must cope with empty inputs.
    async fn load_ndjson(&self, pattern: &str, schema: SchemaRef) -> EngineResult<DataFrame>;

    /// Lift rows materialized in Rust back into the engine.
    fn dataframe_from_batches(
        &self,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> EngineResult<DataFrame>;

    /// Persist a record set to `target` as Parquet, hive-partitioned by
    /// `partition_by` (outermost first; empty means unpartitioned).
    ///
    /// Prior contents at `target` are replaced wholesale; there is no
    /// merge or append mode.
    async fn overwrite_partitioned(
        &self,
        df: DataFrame,
        target: &Path,
        partition_by: &[&str],
    ) -> EngineResult<()>;
}

/// DataFusion-backed [`LakeEngine`].
pub struct DataFusionEngine {
    ctx: SessionContext,
    credentials: StorageCredentials,
}

impl DataFusionEngine {
    /// Create an engine from the run configuration.
    ///
    /// Credentials are held for object-store wiring; local filesystem
    /// runs never consult them.
    pub fn new(config: &EtlConfig) -> Self {
        // Multi-segment glob patterns (e.g. `song_data/*/*/*/*.json`) only
        // match files when subdirectory listing is enabled.
        let session_config = SessionConfig::new()
            .set_bool("datafusion.execution.listing_table_ignore_subdirectory", false);
        let ctx = SessionContext::new_with_config(session_config);
        debug!("created DataFusion session context");
        Self {
            ctx,
            credentials: config.credentials.clone(),
        }
    }

    /// Credentials the storage collaborator reads when a remote backend
    /// is registered.
    pub fn credentials(&self) -> &StorageCredentials {
        &self.credentials
    }
}

/// A missing input prefix is an empty record set, not a failure.
fn is_missing_input(err: &DataFusionError) -> bool {
    match err {
        DataFusionError::ObjectStore(object_store::Error::NotFound { .. }) => true,
        DataFusionError::IoError(io) => io.kind() == std::io::ErrorKind::NotFound,
        DataFusionError::Context(_, inner) => is_missing_input(inner),
        _ => false,
    }
}

#[async_trait]
impl LakeEngine for DataFusionEngine {
    async fn load_ndjson(&self, pattern: &str, schema: SchemaRef) -> EngineResult<DataFrame> {
        let options = NdJsonReadOptions::default().schema(schema.as_ref());
        match self.ctx.read_json(pattern.to_string(), options).await {
            Ok(df) => Ok(df),
            Err(err) if is_missing_input(&err) => {
                warn!(pattern, "input prefix matched no files; using empty record set");
                self.dataframe_from_batches(schema, Vec::new())
            }
            Err(source) => Err(source).context(LoadSnafu {
                pattern: pattern.to_string(),
            }),
        }
    }

    fn dataframe_from_batches(
        &self,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> EngineResult<DataFrame> {
        let table = MemTable::try_new(schema, vec![batches]).context(MaterializeSnafu)?;
        self.ctx
            .read_table(Arc::new(table))
            .context(MaterializeSnafu)
    }

    async fn overwrite_partitioned(
        &self,
        df: DataFrame,
        target: &Path,
        partition_by: &[&str],
    ) -> EngineResult<()> {
        match tokio::fs::remove_dir_all(target).await {
            Ok(()) => debug!(target = %target.display(), "removed previous table contents"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(source).context(RemoveStaleSnafu {
                    path: target.display().to_string(),
                })
            }
        }

        let target_str = target.to_str().context(InvalidTargetPathSnafu {
            path: target.display().to_string(),
        })?;

        let options = DataFrameWriteOptions::new()
            .with_partition_by(partition_by.iter().map(|c| c.to_string()).collect());

        df.write_parquet(target_str, options, None)
            .await
            .context(WriteSnafu {
                path: target_str.to_string(),
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{log_data_schema, song_data_schema};
    use crate::test_util::{play_line, song_line, test_config, write_ndjson, TestResult};
    use serde_json::json;
    use tempfile::TempDir;

    fn engine_at(root: &std::path::Path) -> DataFusionEngine {
        DataFusionEngine::new(&test_config(root, root))
    }

    #[tokio::test]
    async fn load_ndjson_reads_nested_glob() -> TestResult {
        let tmp = TempDir::new()?;
        write_ndjson(
            &tmp.path().join("song_data/A/B/C/part-1.json"),
            &[song_line("SOA1", "Greatest Hit", "AR1", "The Band", 2018, 201.5)],
        )?;
        write_ndjson(
            &tmp.path().join("song_data/A/B/D/part-2.json"),
            &[song_line("SOA2", "Deep Cut", "AR2", "Solo Act", 2001, 150.0)],
        )?;

        let engine = engine_at(tmp.path());
        let pattern = format!("{}/song_data/*/*/*/*.json", tmp.path().display());
        let df = engine.load_ndjson(&pattern, song_data_schema()).await?;

        assert_eq!(df.count().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn load_ndjson_missing_prefix_yields_empty_set() -> TestResult {
        let tmp = TempDir::new()?;
        let engine = engine_at(tmp.path());

        let pattern = format!("{}/log_data/*/*/*.json", tmp.path().display());
        let df = engine.load_ndjson(&pattern, log_data_schema()).await?;

        assert_eq!(df.schema().fields().len(), 11);
        assert_eq!(df.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn load_ndjson_ignores_fields_outside_schema() -> TestResult {
        let tmp = TempDir::new()?;
        let mut line = play_line("39", "Ada", "Lovelace", "F", "paid", 1_541_990_258_796, 101, Some("Greatest Hit"));
        line["method"] = json!("PUT");
        line["status"] = json!(200);
        write_ndjson(&tmp.path().join("log_data/2018/11/events.json"), &[line])?;

        let engine = engine_at(tmp.path());
        let pattern = format!("{}/log_data/*/*/*.json", tmp.path().display());
        let df = engine.load_ndjson(&pattern, log_data_schema()).await?;

        assert_eq!(df.clone().count().await?, 1);
        assert_eq!(df.schema().fields().len(), 11);
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_partitioned_writes_hive_directories() -> TestResult {
        let tmp = TempDir::new()?;
        write_ndjson(
            &tmp.path().join("song_data/A/B/C/part-1.json"),
            &[
                song_line("SOA1", "Greatest Hit", "AR1", "The Band", 2018, 201.5),
                song_line("SOA2", "Deep Cut", "AR2", "Solo Act", 2001, 150.0),
            ],
        )?;

        let engine = engine_at(tmp.path());
        let pattern = format!("{}/song_data/*/*/*/*.json", tmp.path().display());
        let df = engine.load_ndjson(&pattern, song_data_schema()).await?;

        let target = tmp.path().join("out/songs.parquet");
        engine
            .overwrite_partitioned(df, &target, &["year", "artist_id"])
            .await?;

        assert!(target.join("year=2018/artist_id=AR1").is_dir());
        assert!(target.join("year=2001/artist_id=AR2").is_dir());
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_partitioned_replaces_prior_contents() -> TestResult {
        let tmp = TempDir::new()?;
        write_ndjson(
            &tmp.path().join("first/song_data/A/A/A/a.json"),
            &[song_line("SOA1", "Greatest Hit", "AR1", "The Band", 2018, 201.5)],
        )?;
        write_ndjson(
            &tmp.path().join("second/song_data/A/A/A/a.json"),
            &[song_line("SOA2", "Deep Cut", "AR2", "Solo Act", 2001, 150.0)],
        )?;

        let engine = engine_at(tmp.path());
        let target = tmp.path().join("out/songs.parquet");

        let first = format!("{}/first/song_data/*/*/*/*.json", tmp.path().display());
        let df = engine.load_ndjson(&first, song_data_schema()).await?;
        engine
            .overwrite_partitioned(df, &target, &["year", "artist_id"])
            .await?;
        assert!(target.join("year=2018/artist_id=AR1").is_dir());

        let second = format!("{}/second/song_data/*/*/*/*.json", tmp.path().display());
        let df = engine.load_ndjson(&second, song_data_schema()).await?;
        engine
            .overwrite_partitioned(df, &target, &["year", "artist_id"])
            .await?;

        // The previous incarnation is gone, not merged.
        assert!(!target.join("year=2018").exists());
        assert!(target.join("year=2001/artist_id=AR2").is_dir());
        Ok(())
    }

    #[tokio::test]
    async fn dataframe_from_batches_roundtrips_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let engine = engine_at(tmp.path());

        let df = engine.dataframe_from_batches(song_data_schema(), Vec::new())?;
        assert_eq!(df.count().await?, 0);
        Ok(())
    }
}
