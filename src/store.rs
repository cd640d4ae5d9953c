use crate::error::Result;
use crate::schema::{Counterparty, CounterpartyId, Operation};
use crate::utils::{content_fingerprint, lenient_datetime, read_json, write_json_atomic};
use chrono::NaiveDateTime;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const STATEMENT_FILE_NAME: &str = "bank_statement.json";
pub const METADATA_FILE_NAME: &str = "statement_metadata.json";
pub const COUNTERPARTIES_FILE_NAME: &str = "contragents_data.json";

/// Summary written next to the operations snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotMetadata {
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub first_operation_date: NaiveDateTime,
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub last_operation_date: NaiveDateTime,
    pub operation_count: usize,
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub last_updated: NaiveDateTime,
    /// SHA-256 of the compact JSON of the stored operations
    pub content_hash: String,
}

impl SnapshotMetadata {
    /// `None` for an empty set: first/last dates are undefined there.
    pub fn describe(sorted: &[Operation], refreshed_at: NaiveDateTime) -> Result<Option<Self>> {
        let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            first_operation_date: first.date,
            last_operation_date: last.date,
            operation_count: sorted.len(),
            last_updated: refreshed_at,
            content_hash: content_fingerprint(sorted)?,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub operations: Vec<Operation>,
}

/// Durable home of the operations snapshot.
pub trait SnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>>;

    /// Sorts, describes and writes `operations`. Nothing is written for an
    /// empty slice and `None` is returned.
    fn save(
        &self,
        operations: &[Operation],
        refreshed_at: NaiveDateTime,
    ) -> Result<Option<SnapshotMetadata>>;

    fn metadata(&self) -> Result<Option<SnapshotMetadata>>;
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for &T {
    fn load(&self) -> Result<Option<Snapshot>> {
        (**self).load()
    }

    fn save(
        &self,
        operations: &[Operation],
        refreshed_at: NaiveDateTime,
    ) -> Result<Option<SnapshotMetadata>> {
        (**self).save(operations, refreshed_at)
    }

    fn metadata(&self) -> Result<Option<SnapshotMetadata>> {
        (**self).metadata()
    }
}

/// Snapshot as two JSON files in one directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn statement_path(&self) -> PathBuf {
        self.dir.join(STATEMENT_FILE_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.statement_path().exists() && self.metadata_path().exists()
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.exists() {
            return Ok(None);
        }

        let metadata: SnapshotMetadata = read_json(&self.metadata_path())?;
        let operations: Vec<Operation> = read_json(&self.statement_path())?;

        debug!(
            "Loaded snapshot from {}: {} operation(s)",
            self.dir.display(),
            operations.len()
        );
        Ok(Some(Snapshot {
            metadata,
            operations,
        }))
    }

    fn save(
        &self,
        operations: &[Operation],
        refreshed_at: NaiveDateTime,
    ) -> Result<Option<SnapshotMetadata>> {
        let mut sorted = operations.to_vec();
        sorted.sort_by_key(|op| (op.date, op.id));

        let Some(metadata) = SnapshotMetadata::describe(&sorted, refreshed_at)? else {
            debug!("Refusing to write an empty snapshot to {}", self.dir.display());
            return Ok(None);
        };

        // Operations first: a stale metadata file only widens the next update window
        write_json_atomic(&self.statement_path(), &sorted)?;
        write_json_atomic(&self.metadata_path(), &metadata)?;

        info!(
            "Saved {} operation(s) to {} ({}..{})",
            metadata.operation_count,
            self.statement_path().display(),
            metadata.first_operation_date,
            metadata.last_operation_date
        );
        Ok(Some(metadata))
    }

    fn metadata(&self) -> Result<Option<SnapshotMetadata>> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_json(&path)?))
    }
}

/// Durable home of the counterparty cache. Always read and written whole.
pub trait CounterpartyStore {
    fn load_all(&self) -> Result<Vec<Counterparty>>;

    fn save_all(&self, counterparties: &[Counterparty]) -> Result<()>;
}

impl<T: CounterpartyStore + ?Sized> CounterpartyStore for &T {
    fn load_all(&self) -> Result<Vec<Counterparty>> {
        (**self).load_all()
    }

    fn save_all(&self, counterparties: &[Counterparty]) -> Result<()> {
        (**self).save_all(counterparties)
    }
}

#[derive(Debug, Clone)]
pub struct FileCounterpartyStore {
    path: PathBuf,
}

impl FileCounterpartyStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(COUNTERPARTIES_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CounterpartyStore for FileCounterpartyStore {
    fn load_all(&self) -> Result<Vec<Counterparty>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let counterparties: Option<Vec<Counterparty>> = read_json(&self.path)?;
        Ok(counterparties.unwrap_or_default())
    }

    fn save_all(&self, counterparties: &[Counterparty]) -> Result<()> {
        let mut sorted = counterparties.to_vec();
        sorted.sort_by(|a, b| {
            a.display_name()
                .cmp(b.display_name())
                .then_with(|| a.id.cmp(&b.id))
        });

        write_json_atomic(&self.path, &sorted)?;
        info!(
            "Saved {} counterpart(ies) to {}",
            sorted.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory view of the counterparty cache, keyed by normalised id.
#[derive(Debug, Clone, Default)]
pub struct CounterpartyCache {
    entries: HashMap<CounterpartyId, Counterparty>,
}

impl CounterpartyCache {
    pub fn from_entries(counterparties: Vec<Counterparty>) -> Self {
        let entries = counterparties
            .into_iter()
            .map(|cp| (cp.id.clone(), cp))
            .collect();
        Self { entries }
    }

    pub fn load(store: &impl CounterpartyStore) -> Result<Self> {
        Ok(Self::from_entries(store.load_all()?))
    }

    pub fn save(&self, store: &impl CounterpartyStore) -> Result<()> {
        let all: Vec<Counterparty> = self.entries.values().cloned().collect();
        store.save_all(&all)
    }

    pub fn get(&self, id: &CounterpartyId) -> Option<&Counterparty> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &CounterpartyId) -> bool {
        self.entries.contains_key(id)
    }

    /// Adds or overwrites under `key`. Returns `true` if the key was new.
    pub fn insert(&mut self, key: CounterpartyId, counterparty: Counterparty) -> bool {
        self.entries.insert(key, counterparty).is_none()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
