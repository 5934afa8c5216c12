//! Canonical record and table schemas.
//!
//! The two raw input families are newline-delimited JSON with a known
//! field set, so the loader is handed these canonical Arrow schemas
//! instead of re-inferring a column union per run. A field missing from
//! a given line decodes to null; fields outside the schema are ignored.
//! Supplying the schema up front also means a glob that matches no
//! files still yields a well-typed empty record set.
//!
//! Output-side schemas live here too for the tables whose rows are
//! materialized in Rust (`time`, `songplays`) rather than projected
//! straight from an input record set.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

/// Schema of the immutable song-metadata records under `song_data/`.
pub fn song_data_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("song_id", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("artist_name", DataType::Utf8, true),
        Field::new("artist_location", DataType::Utf8, true),
        Field::new("artist_latitude", DataType::Float64, true),
        Field::new("artist_longitude", DataType::Float64, true),
        Field::new("year", DataType::Int64, true),
        Field::new("duration", DataType::Float64, true),
    ]))
}

/// Schema of the user-activity log records under `log_data/`.
///
/// `ts` is an epoch-millisecond timestamp; `page` tags the action and
/// only `NextSong` rows represent an actual song play.
pub fn log_data_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("page", DataType::Utf8, true),
        Field::new("userId", DataType::Utf8, true),
        Field::new("firstName", DataType::Utf8, true),
        Field::new("lastName", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
        Field::new("ts", DataType::Int64, true),
        Field::new("sessionId", DataType::Int64, true),
        Field::new("song", DataType::Utf8, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("userAgent", DataType::Utf8, true),
    ]))
}

/// Schema of the `time` dimension table.
///
/// `start_time` is the event instant truncated to whole seconds; the
/// remaining columns are its calendar decomposition under the
/// configured time reference.
pub fn time_table_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(
            "start_time",
            DataType::Timestamp(TimeUnit::Second, None),
            false,
        ),
        Field::new("hour", DataType::Int32, false),
        Field::new("day", DataType::Int32, false),
        Field::new("week", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        Field::new("year", DataType::Int32, false),
        Field::new("weekday", DataType::Int32, false),
    ]))
}

/// Schema of the `songplays` fact table.
///
/// `songplay_id` is a run-local surrogate; `month` and `year` are the
/// partition columns decomposed from `start_time`.
pub fn songplay_table_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("songplay_id", DataType::Int64, false),
        Field::new(
            "start_time",
            DataType::Timestamp(TimeUnit::Second, None),
            false,
        ),
        Field::new("user_id", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
        Field::new("song_id", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("session_id", DataType::Int64, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("user_agent", DataType::Utf8, true),
        Field::new("month", DataType::Int32, false),
        Field::new("year", DataType::Int32, false),
    ]))
}
