//! Core engine for a star-schema ETL over song-play event data.
//!
//! This crate turns two families of newline-delimited JSON input —
//! immutable song-metadata records and user-activity log records — into
//! a denormalized star schema persisted as partitioned Parquet files:
//!
//! - Four dimension tables (`songs`, `artists`, `users`, `time`),
//!   deduplicated by full-row distinctness (`transform` module).
//! - One fact table (`songplays`) produced by an inner join of play
//!   events against the song dimension on exact title equality, with a
//!   run-local surrogate identifier (`transform` module).
//! - A DataFusion-backed compute capability that loads record sets from
//!   glob patterns and materializes tables to hive-partitioned Parquet
//!   under a full-overwrite policy (`engine` module).
//! - Table layout policy — output names and partition columns — in one
//!   place (`tables` module).
//! - End-to-end orchestration of the song-family and activity-family
//!   pipelines (`pipeline` module).
//!
//! Every run fully recomputes and overwrites each output table from the
//! full input set; there is no incremental or upsert mode. A thin CLI
//! crate is expected to depend on this core rather than re-implementing
//! the transformation logic.
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod records;
pub mod tables;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_util;
