use crate::config::{ClientConfig, PagingPolicy};
use crate::error::Result;
use crate::exports::{BillExport, ExportDir, BILLS_PREFIX};
use crate::fetcher::{fetch_all_pages, DecodePolicy, RemoteFetcher};
use crate::schema::{Bill, Operation};
use crate::store::SnapshotStore;
use crate::window::{
    filter_by_window, initial_window, update_window_start, DateWindow, DEFAULT_LOOKBACK_DAYS,
};
use chrono::{Duration, Local, Months, NaiveDateTime};
use log::{debug, info};
use std::collections::BTreeMap;

/// A record with a stable identity and a position on the time axis.
pub trait Timeline {
    type Key: Ord + Copy;

    fn key(&self) -> Self::Key;

    fn timestamp(&self) -> NaiveDateTime;
}

impl Timeline for Operation {
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }

    fn timestamp(&self) -> NaiveDateTime {
        self.date
    }
}

impl Timeline for Bill {
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }

    fn timestamp(&self) -> NaiveDateTime {
        self.doc_date
    }
}

/// Merges freshly fetched records into an existing set.
///
/// Incoming records replace existing ones with the same key. Anything dated
/// before `retention_start` is dropped. Output is ascending by timestamp,
/// ties broken by key.
pub fn merge_records<T: Timeline>(
    existing: Vec<T>,
    incoming: Vec<T>,
    retention_start: NaiveDateTime,
) -> Vec<T> {
    let mut by_key: BTreeMap<T::Key, T> = existing.into_iter().map(|r| (r.key(), r)).collect();

    for record in incoming {
        by_key.insert(record.key(), record);
    }

    let mut merged: Vec<T> = by_key
        .into_values()
        .filter(|r| r.timestamp() >= retention_start)
        .collect();
    merged.sort_by_key(|r| (r.timestamp(), r.key()));
    merged
}

/// Keeps the local bank statement snapshot current.
pub struct StatementSync<F, S> {
    fetcher: F,
    store: S,
    paging: PagingPolicy,
    lookback: Duration,
}

impl<F: RemoteFetcher, S: SnapshotStore> StatementSync<F, S> {
    pub fn new(fetcher: F, store: S) -> Self {
        Self {
            fetcher,
            store,
            paging: PagingPolicy::statement_default(),
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
        }
    }

    pub fn from_config(config: &ClientConfig, fetcher: F, store: S) -> Result<Self> {
        config.statement_paging.validate("statement_paging")?;
        Ok(Self::new(fetcher, store)
            .with_paging(config.statement_paging.clone())
            .with_lookback(config.lookback()))
    }

    pub fn with_paging(mut self, paging: PagingPolicy) -> Self {
        self.paging = paging;
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Operations of the last `period`, syncing the snapshot first.
    pub fn sync(&self, period: Months) -> Result<Vec<Operation>> {
        self.sync_at(period, Local::now().naive_local())
    }

    pub fn sync_at(&self, period: Months, now: NaiveDateTime) -> Result<Vec<Operation>> {
        let requested = initial_window(period, now)?;
        info!("Syncing bank statement for {}", requested);

        let Some(snapshot) = self.store.load()? else {
            info!("No local snapshot, fetching the full window");
            return self.create_snapshot(&requested, now);
        };

        info!(
            "Loaded snapshot: {} operation(s) from {} to {}",
            snapshot.operations.len(),
            snapshot.metadata.first_operation_date,
            snapshot.metadata.last_operation_date
        );

        let update_start = update_window_start(
            snapshot.metadata.last_operation_date,
            requested.start,
            self.lookback,
        );
        let update_window = requested.with_start(update_start);
        debug!("Update window: {}", update_window);

        let fetched = self.fetch_window(&update_window, DecodePolicy::Lenient)?;
        if fetched.is_empty() {
            info!("No new operations, snapshot left untouched");
            return Ok(filter_by_window(&snapshot.operations, &requested, |op| op.date));
        }

        let fetched_count = fetched.len();
        let merged = merge_records(snapshot.operations, fetched, requested.start);
        self.store.save(&merged, now)?;

        info!(
            "Snapshot updated with {} fetched operation(s), {} in total",
            fetched_count,
            merged.len()
        );
        Ok(filter_by_window(&merged, &requested, |op| op.date))
    }

    fn create_snapshot(&self, requested: &DateWindow, now: NaiveDateTime) -> Result<Vec<Operation>> {
        let operations = self.fetch_window(requested, DecodePolicy::Strict)?;
        if operations.is_empty() {
            info!("No operations found for {}", requested);
            return Ok(Vec::new());
        }

        self.store.save(&operations, now)?;
        Ok(filter_by_window(&operations, requested, |op| op.date))
    }

    /// All operations in `window`, page by page.
    pub fn fetch_window(
        &self,
        window: &DateWindow,
        decode_policy: DecodePolicy,
    ) -> Result<Vec<Operation>> {
        fetch_all_pages("operation", &self.paging, decode_policy, |page, size| {
            self.fetcher.fetch_operations_page(window, page, size)
        })
    }
}

/// Full-refresh export of sales bills.
pub struct BillSync<F> {
    fetcher: F,
    exports: ExportDir,
    paging: PagingPolicy,
    keep_exports: usize,
}

impl<F: RemoteFetcher> BillSync<F> {
    pub fn new(fetcher: F, exports: ExportDir) -> Self {
        Self {
            fetcher,
            exports,
            paging: PagingPolicy::bill_default(),
            keep_exports: 5,
        }
    }

    pub fn from_config(config: &ClientConfig, fetcher: F) -> Result<Self> {
        config.bill_paging.validate("bill_paging")?;
        Ok(Self::new(fetcher, ExportDir::new(config.bills_dir()))
            .with_paging(config.bill_paging.clone())
            .with_keep_exports(config.keep_bill_exports))
    }

    pub fn with_paging(mut self, paging: PagingPolicy) -> Self {
        self.paging = paging;
        self
    }

    pub fn with_keep_exports(mut self, keep: usize) -> Self {
        self.keep_exports = keep;
        self
    }

    pub fn sync_last_year(&self) -> Result<Vec<Bill>> {
        let now = Local::now().naive_local();
        self.sync_at(&initial_window(Months::new(12), now)?, now)
    }

    pub fn sync(&self, window: &DateWindow) -> Result<Vec<Bill>> {
        self.sync_at(window, Local::now().naive_local())
    }

    /// Fetches every bill in `window` and writes a fresh export when any exist.
    pub fn sync_at(&self, window: &DateWindow, now: NaiveDateTime) -> Result<Vec<Bill>> {
        info!("Fetching bills for {}", window);

        let mut bills = fetch_all_pages("bill", &self.paging, DecodePolicy::Strict, |page, size| {
            self.fetcher.fetch_bills_page(window, page, size)
        })?;
        if bills.is_empty() {
            info!("No bills found for {}", window);
            return Ok(bills);
        }
        bills.sort_by_key(|b| (b.timestamp(), b.key()));

        let export = BillExport {
            export_date: now,
            start_date: window.start,
            end_date: window.end,
            bills_count: bills.len(),
            bills,
        };
        self.exports.write(BILLS_PREFIX, &export, now)?;
        self.exports.prune(BILLS_PREFIX, self.keep_exports)?;

        Ok(export.bills)
    }
}
