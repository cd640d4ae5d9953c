use crate::error::Result;
use crate::schema::Bill;
use crate::utils::{export_stamp, lenient_datetime, read_json, write_json_atomic};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const BILLS_PREFIX: &str = "bills";
pub const ENRICHED_BILLS_PREFIX: &str = "enriched_bills";
pub const ENRICHED_OPERATIONS_PREFIX: &str = "operations_with_contragents";

/// A directory of `<prefix>_<yyyyMMdd_HHmmss>.json` files.
///
/// Names sort chronologically, so "latest" is simply the greatest name.
#[derive(Debug, Clone)]
pub struct ExportDir {
    dir: PathBuf,
}

impl ExportDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn write<T: Serialize>(
        &self,
        prefix: &str,
        value: &T,
        now: NaiveDateTime,
    ) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}_{}.json", prefix, export_stamp(now)));
        write_json_atomic(&path, value)?;
        info!("Wrote export {}", path.display());
        Ok(path)
    }

    /// Export files for `prefix`, oldest first.
    pub fn list(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| is_export_name(name, prefix))
                .unwrap_or(false);
            if matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn latest(&self, prefix: &str) -> Result<Option<PathBuf>> {
        Ok(self.list(prefix)?.pop())
    }

    pub fn read_latest<T: DeserializeOwned>(&self, prefix: &str) -> Result<Option<T>> {
        match self.latest(prefix)? {
            Some(path) => {
                debug!("Reading latest {} export {}", prefix, path.display());
                Ok(Some(read_json(&path)?))
            }
            None => Ok(None),
        }
    }

    /// Deletes all but the newest `keep` exports for `prefix`.
    ///
    /// Failing to delete a single file is logged, not returned.
    pub fn prune(&self, prefix: &str, keep: usize) -> Result<usize> {
        let files = self.list(prefix)?;
        if files.len() <= keep {
            return Ok(0);
        }

        let mut removed = 0;
        for path in &files[..files.len() - keep] {
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove old export {}: {}", path.display(), e),
            }
        }
        debug!("Pruned {} old {} export(s)", removed, prefix);
        Ok(removed)
    }
}

// `bills_20240101_120000.json` must not match `enriched_bills_...`
fn is_export_name(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(".json"))
        .map(|stamp| stamp.len() == 15 && stamp.chars().all(|c| c.is_ascii_digit() || c == '_'))
        .unwrap_or(false)
}

/// Layout of a `bills_*.json` export.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct BillExport {
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub export_date: NaiveDateTime,
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub start_date: NaiveDateTime,
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub end_date: NaiveDateTime,
    pub bills_count: usize,
    pub bills: Vec<Bill>,
}

impl BillExport {
    pub fn bill_ids(&self) -> Vec<i64> {
        self.bills.iter().map(|b| b.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(sec: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, 0, sec)
            .unwrap()
    }

    #[test]
    fn test_export_name_matching() {
        assert!(is_export_name("bills_20240501_100000.json", "bills"));
        assert!(!is_export_name("enriched_bills_20240501_100000.json", "bills"));
        assert!(!is_export_name("bills_latest.json", "bills"));
        assert!(!is_export_name("bills_20240501_100000.json.tmp", "bills"));
    }

    #[test]
    fn test_latest_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let exports = ExportDir::new(dir.path());

        for sec in 0..4 {
            exports.write(BILLS_PREFIX, &vec![sec], at(sec)).unwrap();
        }
        exports
            .write(ENRICHED_BILLS_PREFIX, &vec![99], at(59))
            .unwrap();

        let latest: Vec<u32> = exports.read_latest(BILLS_PREFIX).unwrap().unwrap();
        assert_eq!(latest, vec![3]);

        assert_eq!(exports.prune(BILLS_PREFIX, 2).unwrap(), 2);
        assert_eq!(exports.list(BILLS_PREFIX).unwrap().len(), 2);
        // Other prefixes untouched
        assert_eq!(exports.list(ENRICHED_BILLS_PREFIX).unwrap().len(), 1);
    }

    #[test]
    fn test_reads_bill_export_with_offset_dates() {
        let dir = tempfile::tempdir().unwrap();
        let exports = ExportDir::new(dir.path());
        std::fs::write(
            dir.path().join("bills_20240501_100000.json"),
            r#"{
                "ExportDate": "2024-05-01T10:00:00.1234567+03:00",
                "StartDate": "2023-05-01T10:00:00+03:00",
                "EndDate": "2024-05-01T10:00:00+03:00",
                "BillsCount": 1,
                "Bills": [{ "Id": 42, "DocDate": "2024-04-02T00:00:00+03:00", "KontragentId": 7 }]
            }"#,
        )
        .unwrap();

        let export: BillExport = exports.read_latest(BILLS_PREFIX).unwrap().unwrap();
        assert_eq!(export.bill_ids(), vec![42]);
        assert_eq!(export.start_date, at(0) - chrono::Months::new(12));
    }

    #[test]
    fn test_missing_directory_has_no_exports() {
        let dir = tempfile::tempdir().unwrap();
        let exports = ExportDir::new(dir.path().join("nope"));
        assert!(exports.latest(BILLS_PREFIX).unwrap().is_none());
    }
}
