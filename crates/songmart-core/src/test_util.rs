//! Shared test fixtures: NDJSON writers and canned record lines.

use std::io::Write;
use std::path::Path;

use serde_json::{json, Value};

use crate::config::{EtlConfig, StorageCredentials};

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn test_config(input_root: &Path, output_root: &Path) -> EtlConfig {
    EtlConfig {
        credentials: StorageCredentials {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "test-secret".to_string(),
        },
        input_root: input_root.display().to_string(),
        output_root: output_root.display().to_string(),
        timezone: None,
    }
}

/// Write one JSON object per line, creating parent directories.
pub(crate) fn write_ndjson(path: &Path, lines: &[Value]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}

pub(crate) fn song_line(
    song_id: &str,
    title: &str,
    artist_id: &str,
    artist_name: &str,
    year: i64,
    duration: f64,
) -> Value {
    json!({
        "song_id": song_id,
        "title": title,
        "artist_id": artist_id,
        "artist_name": artist_name,
        "artist_location": "Sacramento, CA",
        "artist_latitude": 38.58,
        "artist_longitude": -121.49,
        "year": year,
        "duration": duration,
    })
}

/// A `NextSong` activity line; `song` is `None` for plays whose title
/// field is absent.
#[allow(clippy::too_many_arguments)]
pub(crate) fn play_line(
    user_id: &str,
    first_name: &str,
    last_name: &str,
    gender: &str,
    level: &str,
    ts: i64,
    session_id: i64,
    song: Option<&str>,
) -> Value {
    json!({
        "page": "NextSong",
        "userId": user_id,
        "firstName": first_name,
        "lastName": last_name,
        "gender": gender,
        "level": level,
        "ts": ts,
        "sessionId": session_id,
        "song": song,
        "location": "San Francisco-Oakland-Hayward, CA",
        "userAgent": "Mozilla/5.0",
    })
}

/// A non-play activity line (login, help page, and so on).
pub(crate) fn page_visit_line(user_id: &str, page: &str, ts: i64) -> Value {
    json!({
        "page": page,
        "userId": user_id,
        "firstName": "Casey",
        "lastName": "Visitor",
        "gender": "M",
        "level": "free",
        "ts": ts,
        "sessionId": 7,
        "song": null,
        "location": "Chicago-Naperville-Elgin, IL-IN-WI",
        "userAgent": "Mozilla/5.0",
    })
}
