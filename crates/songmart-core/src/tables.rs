//! Output table layout policy.
//!
//! Keeps table names and partition columns in one place so the
//! partition layout can be evolved without touching transform or
//! pipeline logic. Partitioning exists only so downstream readers can
//! prune files by predicate on the partition columns; it has no bearing
//! on the correctness of the data itself.

use std::path::{Path, PathBuf};

/// Name and partition layout of one output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name; the on-disk directory is `<name>.parquet`.
    pub name: &'static str,
    /// Partition columns, outermost first. Empty means unpartitioned.
    pub partition_by: &'static [&'static str],
}

impl TableSpec {
    /// Target directory for this table under `output_root`.
    pub fn target_path(&self, output_root: &Path) -> PathBuf {
        output_root.join(format!("{}.parquet", self.name))
    }
}

/// Song dimension, partitioned by release year then artist.
pub const SONGS: TableSpec = TableSpec {
    name: "songs",
    partition_by: &["year", "artist_id"],
};

/// Artist dimension, unpartitioned.
pub const ARTISTS: TableSpec = TableSpec {
    name: "artists",
    partition_by: &[],
};

/// User dimension, unpartitioned.
pub const USERS: TableSpec = TableSpec {
    name: "users",
    partition_by: &[],
};

/// Time dimension, partitioned by year then month.
pub const TIME: TableSpec = TableSpec {
    name: "time",
    partition_by: &["year", "month"],
};

/// Songplay fact table, partitioned by year then month.
pub const SONGPLAYS: TableSpec = TableSpec {
    name: "songplays",
    partition_by: &["year", "month"],
};
