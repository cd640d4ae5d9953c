use crate::error::{Result, SyncError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Format used by the remote API for date query parameters.
pub const API_DATE_FORMAT: &str = "%Y.%m.%d";

/// Suffix format for timestamped export files.
pub const EXPORT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Parses a timestamp as the remote API emits it.
///
/// Accepts naive ISO-8601 (`2024-01-05T10:30:00`), RFC 3339 with an offset
/// (the wall-clock time in that offset is kept), and bare dates in either
/// `2024-01-05` or `2024.01.05` form.
pub fn parse_api_datetime(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();

    if let Ok(dt) = raw.parse::<NaiveDateTime>() {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    for format in ["%Y-%m-%d", API_DATE_FORMAT] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date.and_time(NaiveTime::MIN));
        }
    }

    Err(SyncError::DateError(format!(
        "Unrecognised timestamp '{}'. Expected ISO-8601, RFC 3339 or YYYY-MM-DD",
        raw
    )))
}

/// `deserialize_with` helpers for timestamps coming off the wire.
pub mod lenient_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_api_datetime(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D>(
            deserializer: D,
        ) -> std::result::Result<Option<NaiveDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) if !raw.trim().is_empty() => super::super::parse_api_datetime(&raw)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                _ => Ok(None),
            }
        }
    }
}

/// SHA-256 hex digest of the compact JSON encoding of `value`.
pub fn content_fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Writes pretty JSON next to `path` and renames it into place.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn export_stamp(now: NaiveDateTime) -> String {
    now.format(EXPORT_STAMP_FORMAT).to_string()
}

/// Blocking courtesy delay between remote calls.
pub fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
