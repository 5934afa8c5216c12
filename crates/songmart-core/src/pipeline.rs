//! End-to-end run orchestration.
//!
//! One run is a pure function of the input prefix: load both raw record
//! families, derive the five tables, and overwrite each table's target
//! directory. The two input families drive two stages:
//!
//! 1. song metadata yields the `songs` and `artists` dimensions, and
//! 2. activity logs yield `users`, `time`, and the `songplays` facts,
//!    with the fact join consuming the song dimension derived in the
//!    first stage rather than re-reading it from disk.
//!
//! There is no incremental mode and no cross-run state; rerunning with
//! the same inputs converges to the same table contents.

use std::path::Path;

use datafusion::prelude::DataFrame;
use snafu::{prelude::*, Backtrace};
use tracing::info;

use crate::config::{ConfigError, EtlConfig, TimeReference};
use crate::engine::{DataFusionEngine, EngineError, LakeEngine};
use crate::records::{log_data_schema, song_data_schema};
use crate::tables::{self, TableSpec};
use crate::transform::{self, TransformError};

/// Layout of the song-metadata records under the input root.
pub const SONG_DATA_GLOB: &str = "song_data/*/*/*/*.json";

/// Layout of the activity-log records under the input root.
pub const LOG_DATA_GLOB: &str = "log_data/*/*/*.json";

/// Result alias for pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by a pipeline run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    /// The run configuration is unusable.
    #[snafu(display("Invalid run configuration: {source}"))]
    Config {
        /// Underlying configuration error.
        source: ConfigError,
    },

    /// Loading a raw input family failed.
    #[snafu(display("Failed to load {dataset} records: {source}"))]
    Load {
        /// The input family being loaded.
        dataset: &'static str,
        /// Underlying engine error.
        source: EngineError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Deriving a table from the raw record sets failed.
    #[snafu(display("Failed to derive table '{table}': {source}"))]
    Derive {
        /// The table being derived.
        table: &'static str,
        /// Underlying transform error.
        source: TransformError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Persisting a derived table failed.
    #[snafu(display("Failed to write table '{table}': {source}"))]
    Write {
        /// The table being written.
        table: &'static str,
        /// Underlying engine error.
        source: EngineError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

/// Join an input glob onto the configured root prefix.
fn input_pattern(root: &str, glob: &str) -> String {
    format!("{}/{glob}", root.trim_end_matches('/'))
}

/// Run the whole pipeline with a DataFusion engine built from `config`.
pub async fn run(config: &EtlConfig) -> PipelineResult<()> {
    let engine = DataFusionEngine::new(config);
    run_with_engine(&engine, config).await
}

/// Run the whole pipeline against an injected engine.
pub async fn run_with_engine(engine: &dyn LakeEngine, config: &EtlConfig) -> PipelineResult<()> {
    let reference = config.time_reference().context(ConfigSnafu)?;
    let output_root = Path::new(&config.output_root);

    let songs_dim = process_song_data(engine, config, output_root).await?;
    process_log_data(engine, config, output_root, &songs_dim, reference).await?;

    info!("pipeline run complete");
    Ok(())
}

/// Stage one: derive and persist the `songs` and `artists` dimensions.
///
/// Returns the song dimension record set so the fact join can consume
/// it directly instead of reading the freshly written table back.
async fn process_song_data(
    engine: &dyn LakeEngine,
    config: &EtlConfig,
    output_root: &Path,
) -> PipelineResult<DataFrame> {
    let pattern = input_pattern(&config.input_root, SONG_DATA_GLOB);
    info!(pattern, "loading song metadata");
    let raw = engine
        .load_ndjson(&pattern, song_data_schema())
        .await
        .context(LoadSnafu {
            dataset: "song_data",
        })?;

    let songs = transform::song_dimension(&raw).context(DeriveSnafu {
        table: tables::SONGS.name,
    })?;
    write_table(engine, songs.clone(), &tables::SONGS, output_root).await?;

    let artists = transform::artist_dimension(&raw).context(DeriveSnafu {
        table: tables::ARTISTS.name,
    })?;
    write_table(engine, artists, &tables::ARTISTS, output_root).await?;

    Ok(songs)
}

/// Stage two: derive and persist `users`, `time`, and `songplays` from
/// the filtered activity records.
async fn process_log_data(
    engine: &dyn LakeEngine,
    config: &EtlConfig,
    output_root: &Path,
    songs_dim: &DataFrame,
    reference: TimeReference,
) -> PipelineResult<()> {
    let pattern = input_pattern(&config.input_root, LOG_DATA_GLOB);
    info!(pattern, "loading activity logs");
    let raw = engine
        .load_ndjson(&pattern, log_data_schema())
        .await
        .context(LoadSnafu { dataset: "log_data" })?;

    let plays = transform::song_plays(&raw).context(DeriveSnafu {
        table: tables::SONGPLAYS.name,
    })?;

    let users = transform::user_dimension(&plays).context(DeriveSnafu {
        table: tables::USERS.name,
    })?;
    write_table(engine, users, &tables::USERS, output_root).await?;

    let time = transform::time_dimension(engine, &plays, reference)
        .await
        .context(DeriveSnafu {
            table: tables::TIME.name,
        })?;
    write_table(engine, time, &tables::TIME, output_root).await?;

    let facts = transform::songplay_facts(engine, &plays, songs_dim, reference)
        .await
        .context(DeriveSnafu {
            table: tables::SONGPLAYS.name,
        })?;
    write_table(engine, facts, &tables::SONGPLAYS, output_root).await?;

    Ok(())
}

async fn write_table(
    engine: &dyn LakeEngine,
    df: DataFrame,
    spec: &TableSpec,
    output_root: &Path,
) -> PipelineResult<()> {
    let target = spec.target_path(output_root);
    info!(table = spec.name, target = %target.display(), "writing table");
    engine
        .overwrite_partitioned(df, &target, spec.partition_by)
        .await
        .context(WriteSnafu { table: spec.name })
}
