//! Pipeline configuration.
//!
//! All run-scoped settings live in one `EtlConfig` value, deserialized
//! from a JSON file once at startup and passed by reference to whichever
//! component needs it. Nothing in the core reads ambient process state:
//! storage credentials go to the engine constructor, and the time
//! reference used for timestamp decomposition is an explicit field
//! rather than the execution host's local zone.

use std::path::Path;

use chrono::FixedOffset;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the configuration file.
///
/// Every variant is fatal at startup, before any engine work begins.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("Failed to read config file {path}: {source}"))]
    Read {
        /// Path of the configuration file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The configuration file is not valid JSON for `EtlConfig`.
    #[snafu(display("Malformed config file {path}: {source}"))]
    Parse {
        /// Path of the configuration file.
        path: String,
        /// Underlying deserialization error.
        source: serde_json::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A required entry is present but empty.
    #[snafu(display("Config entry '{entry}' must not be empty"))]
    EmptyEntry {
        /// Name of the offending entry.
        entry: &'static str,
    },

    /// The timezone entry could not be parsed as a fixed UTC offset.
    #[snafu(display("Invalid timezone '{spec}': expected a fixed offset such as '+02:00'"))]
    InvalidTimezone {
        /// The offending timezone string.
        spec: String,
    },
}

/// Credentials handed to the engine for object-store access.
///
/// Local filesystem runs never consult these; they exist so remote
/// storage backends can be wired into the engine without the core ever
/// touching process-wide environment state.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageCredentials {
    /// Access key identifier.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

/// The calendar reference used when decomposing event timestamps.
///
/// The observed reference behavior used the execution host's local
/// zone; here the reference is explicit configuration, defaulting to
/// UTC when the config file carries no `timezone` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeReference {
    /// Interpret instants in UTC.
    Utc,
    /// Interpret instants at a fixed offset from UTC.
    Fixed(FixedOffset),
}

impl TimeReference {
    /// Parse an optional offset spec (for example `"+02:00"`).
    ///
    /// `None` means UTC.
    pub fn parse(spec: Option<&str>) -> ConfigResult<Self> {
        match spec {
            None => Ok(TimeReference::Utc),
            Some(s) => {
                let offset = s
                    .parse::<FixedOffset>()
                    .ok()
                    .context(InvalidTimezoneSnafu { spec: s.to_string() })?;
                Ok(TimeReference::Fixed(offset))
            }
        }
    }
}

/// Run-scoped pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EtlConfig {
    /// Object-store credentials (required even for local runs so a
    /// missing entry fails at startup rather than mid-pipeline).
    pub credentials: StorageCredentials,
    /// Root prefix under which `song_data/` and `log_data/` live.
    pub input_root: String,
    /// Root prefix under which the five output tables are written.
    pub output_root: String,
    /// Optional fixed-offset timezone spec; UTC when absent.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl EtlConfig {
    /// Load and validate the configuration from a JSON file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).context(ReadSnafu {
            path: display.clone(),
        })?;
        let config: EtlConfig =
            serde_json::from_str(&contents).context(ParseSnafu { path: display })?;
        config.validate()?;
        Ok(config)
    }

    /// The time reference for timestamp decomposition.
    pub fn time_reference(&self) -> ConfigResult<TimeReference> {
        TimeReference::parse(self.timezone.as_deref())
    }

    fn validate(&self) -> ConfigResult<()> {
        ensure!(
            !self.credentials.access_key_id.is_empty(),
            EmptyEntrySnafu { entry: "credentials.access_key_id" }
        );
        ensure!(
            !self.credentials.secret_access_key.is_empty(),
            EmptyEntrySnafu { entry: "credentials.secret_access_key" }
        );
        ensure!(!self.input_root.is_empty(), EmptyEntrySnafu { entry: "input_root" });
        ensure!(!self.output_root.is_empty(), EmptyEntrySnafu { entry: "output_root" });
        // Surface a bad timezone at startup, not at time-dimension build.
        self.time_reference()?;
        Ok(())
    }
}
