use chrono::{Months, NaiveDate, NaiveDateTime};
use moedelo_sync::*;
use rust_decimal::Decimal;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::Path;

fn dt(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn op(id: i64, date: NaiveDateTime, sum: i64) -> Operation {
    Operation::new(id, date, Decimal::from(sum))
}

fn bill(id: i64, date: &str, kontragent: &str) -> Bill {
    serde_json::from_value(json!({
        "Id": id,
        "Number": format!("B-{}", id),
        "DocDate": date,
        "Status": 4,
        "KontragentId": kontragent,
        "Sum": 1000
    }))
    .unwrap()
}

fn detail(id: i64, kontragent: i64) -> BillDetail {
    serde_json::from_value(json!({
        "Id": id,
        "Number": format!("B-{}", id),
        "DocDate": "2024-03-01T00:00:00",
        "Status": 6,
        "KontragentId": kontragent,
        "Sum": 1000,
        "Items": [{ "Name": "Consulting", "Count": 1, "Price": 1000 }]
    }))
    .unwrap()
}

fn test_config(dir: &Path) -> ClientConfig {
    ClientConfig::new("test-key")
        .with_storage_dir(dir)
        .without_delays()
}

/// In-memory stand-in for the remote API that records what was asked of it.
#[derive(Default)]
struct ScriptedRemote {
    operations: Vec<Operation>,
    bills: Vec<Bill>,
    details: HashMap<i64, BillDetail>,
    counterparties: HashMap<String, Counterparty>,
    /// Ids whose detail batch fails with a server error
    failing_details: HashSet<i64>,
    /// Ids whose lookup fails with a transport error
    unreachable: HashSet<String>,
    operations_down: Cell<bool>,
    /// Operation pages whose body cannot be decoded
    undecodable_pages: HashSet<usize>,
    operation_windows: RefCell<Vec<DateWindow>>,
    operation_calls: Cell<usize>,
    detail_batches: RefCell<Vec<Vec<i64>>>,
    lookups: RefCell<Vec<String>>,
}

impl ScriptedRemote {
    fn knows(mut self, id: &str, name: &str) -> Self {
        let mut cp = Counterparty::new(id, name);
        cp.inn = Some(format!("77{}", id));
        self.counterparties.insert(id.to_string(), cp);
        self
    }
}

fn page_of<T: Clone>(records: Vec<T>, page: usize, page_size: usize) -> Vec<T> {
    records
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect()
}

impl RemoteFetcher for ScriptedRemote {
    fn fetch_operations_page(
        &self,
        window: &DateWindow,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Operation>> {
        self.operation_calls.set(self.operation_calls.get() + 1);
        if page == 1 {
            self.operation_windows.borrow_mut().push(*window);
        }
        if self.operations_down.get() {
            return Err(SyncError::Transport("connection timed out".to_string()));
        }
        if self.undecodable_pages.contains(&page) {
            return Err(SyncError::Decode("expected value at line 1 column 1".to_string()));
        }
        let in_window: Vec<Operation> = self
            .operations
            .iter()
            .filter(|o| window.contains(o.date))
            .cloned()
            .collect();
        Ok(page_of(in_window, page, page_size))
    }

    fn fetch_bills_page(
        &self,
        window: &DateWindow,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Bill>> {
        let in_window: Vec<Bill> = self
            .bills
            .iter()
            .filter(|b| window.contains(b.doc_date))
            .cloned()
            .collect();
        Ok(page_of(in_window, page, page_size))
    }

    fn fetch_bill_details(&self, ids: &[i64]) -> Result<Vec<BillDetail>> {
        self.detail_batches.borrow_mut().push(ids.to_vec());
        if ids.iter().any(|id| self.failing_details.contains(id)) {
            return Err(SyncError::UnexpectedStatus {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.details.get(id).cloned())
            .collect())
    }

    fn fetch_counterparty(&self, id: &CounterpartyId) -> Result<Counterparty> {
        self.lookups.borrow_mut().push(id.to_string());
        if self.unreachable.contains(id.as_str()) {
            return Err(SyncError::Transport("connection reset".to_string()));
        }
        self.counterparties
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("kontragent {}", id)))
    }
}

#[test]
fn test_incremental_sync_merges_late_and_edited_operations() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileSnapshotStore::new(dir.path());

    // Stored: one operation per day, Jan 1..10
    let existing: Vec<Operation> = (1..=10).map(|d| op(d, dt(2024, 1, d as u32), 100)).collect();
    store.save(&existing, dt(2024, 1, 10)).unwrap();

    let remote = ScriptedRemote {
        operations: vec![
            op(5, dt(2024, 1, 5), 555),
            op(11, dt(2024, 1, 11), 100),
            op(12, dt(2024, 1, 12), 100),
        ],
        ..ScriptedRemote::default()
    };

    let now = dt(2024, 6, 1);
    let sync = StatementSync::from_config(&config, &remote, &store).unwrap();
    let result = sync.sync_at(Months::new(12), now).unwrap();

    assert_eq!(result.len(), 12);
    let edited = result.iter().find(|o| o.id == 5).unwrap();
    assert_eq!(edited.sum, Decimal::from(555));

    {
        let windows = remote.operation_windows.borrow();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, dt(2023, 6, 1));
        assert_eq!(windows[0].end, now);
    }

    let metadata = store.metadata().unwrap().unwrap();
    assert_eq!(metadata.operation_count, 12);
    assert_eq!(metadata.first_operation_date, dt(2024, 1, 1));
    assert_eq!(metadata.last_operation_date, dt(2024, 1, 12));
    assert_eq!(metadata.last_updated, now);

    // Re-running over the same remote state is idempotent
    let again = StatementSync::from_config(&config, &remote, &store)
        .unwrap()
        .sync_at(Months::new(12), now)
        .unwrap();
    assert_eq!(again, result);
    let ids: HashSet<i64> = again.iter().map(|o| o.id).collect();
    assert_eq!(ids.len(), again.len());
}

#[test]
fn test_first_sync_with_no_remote_data_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let remote = ScriptedRemote::default();

    let result = sync_bank_statement(&config, &remote, Months::new(12)).unwrap();

    assert!(result.is_empty());
    assert!(!dir.path().join("bank_statement.json").exists());
    assert!(!dir.path().join("statement_metadata.json").exists());
}

#[test]
fn test_first_sync_creates_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileSnapshotStore::new(dir.path());
    let remote = ScriptedRemote {
        operations: vec![op(2, dt(2024, 3, 2), 20), op(1, dt(2024, 3, 1), 10)],
        ..ScriptedRemote::default()
    };

    let result = StatementSync::from_config(&config, &remote, &store)
        .unwrap()
        .sync_at(Months::new(6), dt(2024, 6, 1))
        .unwrap();

    let ids: Vec<i64> = result.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(remote.operation_windows.borrow()[0].start, dt(2023, 12, 1));
    assert!(store.exists());
}

#[test]
fn test_undecodable_page_fails_first_sync() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileSnapshotStore::new(dir.path());
    let remote = ScriptedRemote {
        operations: vec![op(1, dt(2024, 5, 1), 10)],
        undecodable_pages: [1].into_iter().collect(),
        ..ScriptedRemote::default()
    };

    let err = StatementSync::from_config(&config, &remote, &store)
        .unwrap()
        .sync_at(Months::new(12), dt(2024, 6, 1))
        .unwrap_err();

    assert!(matches!(err, SyncError::Decode(_)));
    assert_eq!(remote.operation_calls.get(), 1);
    assert!(!store.exists());
}

#[test]
fn test_undecodable_page_ends_update_and_keeps_earlier_pages() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.statement_paging.page_size = 2;
    let store = FileSnapshotStore::new(dir.path());
    store
        .save(&[op(1, dt(2024, 1, 1), 10)], dt(2024, 1, 2))
        .unwrap();

    let remote = ScriptedRemote {
        operations: vec![
            op(2, dt(2024, 1, 2), 20),
            op(3, dt(2024, 1, 3), 30),
            op(4, dt(2024, 1, 4), 40),
        ],
        undecodable_pages: [2].into_iter().collect(),
        ..ScriptedRemote::default()
    };

    let now = dt(2024, 6, 1);
    let result = StatementSync::from_config(&config, &remote, &store)
        .unwrap()
        .sync_at(Months::new(12), now)
        .unwrap();

    let ids: Vec<i64> = result.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(remote.operation_calls.get(), 2);

    let metadata = store.metadata().unwrap().unwrap();
    assert_eq!(metadata.operation_count, 3);
    assert_eq!(metadata.last_operation_date, dt(2024, 1, 3));
    assert_eq!(metadata.last_updated, now);
}

#[test]
fn test_update_with_no_new_operations_leaves_snapshot_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileSnapshotStore::new(dir.path());

    let existing = vec![op(1, dt(2023, 1, 15), 10), op(2, dt(2024, 2, 1), 20)];
    let before = store.save(&existing, dt(2024, 2, 2)).unwrap().unwrap();

    let remote = ScriptedRemote::default();
    let result = StatementSync::from_config(&config, &remote, &store)
        .unwrap()
        .sync_at(Months::new(12), dt(2024, 6, 1))
        .unwrap();

    // Only the operation inside the requested year comes back
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, 2);
    assert_eq!(store.metadata().unwrap(), Some(before));
}

#[test]
fn test_exhausted_retries_abort_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileSnapshotStore::new(dir.path());

    let remote = ScriptedRemote {
        operations: vec![op(1, dt(2024, 5, 1), 10)],
        ..ScriptedRemote::default()
    };
    remote.operations_down.set(true);

    let err = StatementSync::from_config(&config, &remote, &store)
        .unwrap()
        .sync_at(Months::new(12), dt(2024, 6, 1))
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(remote.operation_calls.get(), config.statement_paging.max_attempts as usize);
    assert!(!store.exists());

    // Same with a snapshot in place: it must survive unchanged
    let before = store
        .save(&[op(7, dt(2024, 4, 1), 70)], dt(2024, 4, 2))
        .unwrap()
        .unwrap();
    let result = StatementSync::from_config(&config, &remote, &store)
        .unwrap()
        .sync_at(Months::new(12), dt(2024, 6, 1));
    assert!(result.is_err());
    assert_eq!(store.metadata().unwrap(), Some(before));
}

#[test]
fn test_bill_enrichment_resolves_from_cache_then_remote() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let counterparty_store = FileCounterpartyStore::new(dir.path());
    counterparty_store
        .save_all(&[
            Counterparty::new("10", "Alpha LLC"),
            Counterparty::new("20", "Beta LLC"),
        ])
        .unwrap();

    let kontragents = [10, 10, 20, 30, 99];
    let remote = ScriptedRemote {
        bills: kontragents
            .iter()
            .enumerate()
            .map(|(i, k)| bill(i as i64 + 1, "2024-03-01T00:00:00", &k.to_string()))
            .collect(),
        details: kontragents
            .iter()
            .enumerate()
            .map(|(i, k)| (i as i64 + 1, detail(i as i64 + 1, *k)))
            .collect(),
        ..ScriptedRemote::default()
    }
    .knows("30", "Gamma LLC");

    let now = dt(2024, 6, 1);
    let window = DateWindow::new(dt(2023, 6, 1), now).unwrap();
    let bills = BillSync::from_config(&config, &remote)
        .unwrap()
        .sync_at(&window, now)
        .unwrap();
    assert_eq!(bills.len(), 5);

    let batch = BillEnricher::from_config(&config, &remote, &counterparty_store)
        .unwrap()
        .enrich_latest_at(now)
        .unwrap();

    assert_eq!(batch.summary.total, 5);
    assert_eq!(batch.summary.resolved(), 4);
    assert_eq!(batch.summary.resolved_from_cache, 3);
    assert_eq!(batch.summary.resolved_remotely, 1);
    assert_eq!(batch.summary.not_found, 1);
    assert_eq!(
        *remote.lookups.borrow(),
        vec!["30".to_string(), "99".to_string()]
    );

    let unresolved = batch.records.iter().find(|r| !r.is_resolved()).unwrap();
    assert_eq!(unresolved.record.id, 5);
    assert_eq!(unresolved.failure().map(|f| f.kind()), Some("not-found"));

    let cached: HashSet<String> = counterparty_store
        .load_all()
        .unwrap()
        .into_iter()
        .map(|cp| cp.id.to_string())
        .collect();
    let expected: HashSet<String> = ["10", "20", "30"].iter().map(|s| s.to_string()).collect();
    assert_eq!(cached, expected);

    let report: EnrichedBillsExport = ExportDir::new(config.bills_dir())
        .read_latest("enriched_bills")
        .unwrap()
        .unwrap();
    assert_eq!(report.total_bills, 5);
    assert_eq!(report.bills_with_contragent, 4);
    assert_eq!(report.bills_without_contragent, 1);
    assert_eq!(report.enriched_bills[3].contragent_name.as_deref(), Some("Gamma LLC"));
    assert_eq!(report.enriched_bills[3].bill_status, "Paid");
}

#[test]
fn test_failed_detail_batch_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.detail_batch_size = 2;

    let mut remote = ScriptedRemote {
        bills: (1..=5)
            .map(|id| bill(id, "2024-03-01T00:00:00", "10"))
            .collect(),
        details: (1..=5).map(|id| (id, detail(id, 10))).collect(),
        ..ScriptedRemote::default()
    }
    .knows("10", "Alpha LLC");
    remote.failing_details.insert(3);

    let now = dt(2024, 6, 1);
    let window = DateWindow::new(dt(2024, 1, 1), now).unwrap();
    BillSync::from_config(&config, &remote)
        .unwrap()
        .sync_at(&window, now)
        .unwrap();

    let batch = enrich_latest_bills(&config, &remote).unwrap();

    assert_eq!(
        *remote.detail_batches.borrow(),
        vec![vec![1, 2], vec![3, 4], vec![5]]
    );
    let ids: Vec<i64> = batch.records.iter().map(|r| r.record.id).collect();
    assert_eq!(ids, vec![1, 2, 5]);
    assert!(batch.records.iter().all(|r| r.is_resolved()));
    // One distinct miss, fetched once
    assert_eq!(remote.lookups.borrow().len(), 1);
}

#[test]
fn test_bill_exports_are_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let remote = ScriptedRemote {
        bills: (1..=250)
            .map(|id| bill(id, "2024-03-01T00:00:00", "10"))
            .collect(),
        ..ScriptedRemote::default()
    };

    let sync = BillSync::from_config(&config, &remote).unwrap();
    let window = DateWindow::new(dt(2024, 1, 1), dt(2024, 6, 1)).unwrap();
    for day in 1..=7 {
        let bills = sync.sync_at(&window, dt(2024, 6, day)).unwrap();
        assert_eq!(bills.len(), 250);
    }

    let exports = ExportDir::new(config.bills_dir());
    let files = exports.list("bills").unwrap();
    assert_eq!(files.len(), config.keep_bill_exports);

    let latest: BillExport = exports.read_latest("bills").unwrap().unwrap();
    assert_eq!(latest.bills_count, 250);
    assert_eq!(latest.export_date, dt(2024, 6, 7));
}

#[test]
fn test_statement_enrichment_reports_every_failure_kind() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = FileSnapshotStore::new(dir.path());

    store
        .save(
            &[
                op(1, dt(2024, 5, 1), 10).with_contractor("10", "Alpha"),
                op(2, dt(2024, 5, 2), 20),
                op(3, dt(2024, 5, 3), 30).with_contractor("77", "Gone"),
                op(4, dt(2024, 5, 4), 40).with_contractor("88", "Flaky"),
            ],
            dt(2024, 5, 5),
        )
        .unwrap();

    let mut remote = ScriptedRemote::default().knows("10", "Alpha LLC");
    remote.unreachable.insert("88".to_string());

    let batch = enrich_bank_statement(&config, &remote).unwrap();

    let kinds: Vec<&str> = batch
        .records
        .iter()
        .map(|r| r.failure().map(|f| f.kind()).unwrap_or("resolved"))
        .collect();
    assert_eq!(kinds, vec!["resolved", "no-reference", "not-found", "lookup-error"]);
    assert_eq!(batch.summary.lookup_errors, 1);
    assert_eq!(batch.records[0].counterparty_inn().as_deref(), Some("7710"));

    let exports = ExportDir::new(dir.path());
    let entries: Vec<EnrichedOperationEntry> = exports
        .read_latest("operations_with_contragents")
        .unwrap()
        .unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries[0].contragent_loaded);
    assert!(entries[0].error_message.is_empty());
    assert!(!entries[3].contragent_loaded);
    assert!(entries[3].error_message.starts_with("lookup-error"));

    // The unreachable counterparty is not cached, the fetched one is
    let cache = CounterpartyCache::load(&FileCounterpartyStore::new(dir.path())).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(&CounterpartyId::new("10")));
}

#[test]
fn test_enriching_without_snapshot_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let remote = ScriptedRemote::default();

    let batch = enrich_bank_statement(&config, &remote).unwrap();
    assert!(batch.records.is_empty());
    assert!(remote.lookups.borrow().is_empty());
}
