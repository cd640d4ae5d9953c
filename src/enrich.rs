use crate::config::ClientConfig;
use crate::error::{Result, SyncError};
use crate::exports::{
    BillExport, ExportDir, BILLS_PREFIX, ENRICHED_BILLS_PREFIX, ENRICHED_OPERATIONS_PREFIX,
};
use crate::fetcher::RemoteFetcher;
use crate::schema::{Bill, BillDetail, Counterparty, CounterpartyId, Operation};
use crate::store::{CounterpartyCache, CounterpartyStore, SnapshotStore};
use crate::utils::pause;
use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// A record that may point at a counterparty.
pub trait CounterpartyReference {
    /// The normalised cache key, or `None` when the record carries no usable
    /// reference. Empty ids count as no reference.
    fn counterparty_ref(&self) -> Option<CounterpartyId>;
}

impl CounterpartyReference for Operation {
    fn counterparty_ref(&self) -> Option<CounterpartyId> {
        self.contractor
            .as_ref()
            .and_then(|c| c.id.clone())
            .filter(|id| !id.is_empty())
    }
}

impl CounterpartyReference for Bill {
    fn counterparty_ref(&self) -> Option<CounterpartyId> {
        self.counterparty_id.clone().filter(|id| !id.is_empty())
    }
}

impl CounterpartyReference for BillDetail {
    fn counterparty_ref(&self) -> Option<CounterpartyId> {
        self.counterparty_id.clone().filter(|id| !id.is_empty())
    }
}

/// Why a record ended up without a counterparty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    NoReference,
    NotFound(CounterpartyId),
    LookupError { id: CounterpartyId, message: String },
}

impl ResolutionFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionFailure::NoReference => "no-reference",
            ResolutionFailure::NotFound(_) => "not-found",
            ResolutionFailure::LookupError { .. } => "lookup-error",
        }
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionFailure::NoReference => {
                write!(f, "no-reference: record has no counterparty id")
            }
            ResolutionFailure::NotFound(id) => {
                write!(f, "not-found: counterparty {} does not exist remotely", id)
            }
            ResolutionFailure::LookupError { id, message } => {
                write!(f, "lookup-error: counterparty {}: {}", id, message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Counterparty),
    Failed(ResolutionFailure),
}

/// A base record together with the outcome of resolving its counterparty.
#[derive(Debug, Clone, PartialEq)]
pub struct Enriched<T> {
    pub record: T,
    pub resolution: Resolution,
}

impl<T> Enriched<T> {
    pub fn counterparty(&self) -> Option<&Counterparty> {
        match &self.resolution {
            Resolution::Resolved(cp) => Some(cp),
            Resolution::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ResolutionFailure> {
        match &self.resolution {
            Resolution::Resolved(_) => None,
            Resolution::Failed(failure) => Some(failure),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved(_))
    }

    /// Empty when resolved.
    pub fn failure_reason(&self) -> String {
        self.failure().map(|f| f.to_string()).unwrap_or_default()
    }

    pub fn counterparty_name(&self) -> Option<String> {
        self.counterparty().map(|cp| cp.display_name().to_string())
    }

    pub fn counterparty_inn(&self) -> Option<String> {
        self.counterparty().and_then(|cp| cp.inn.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    pub total: usize,
    pub resolved_from_cache: usize,
    pub resolved_remotely: usize,
    pub not_found: usize,
    pub lookup_errors: usize,
    pub no_reference: usize,
    /// Distinct keys requested from the remote side
    pub remote_lookups: usize,
}

impl EnrichmentSummary {
    pub fn resolved(&self) -> usize {
        self.resolved_from_cache + self.resolved_remotely
    }

    pub fn unresolved(&self) -> usize {
        self.total - self.resolved()
    }
}

impl fmt::Display for EnrichmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} resolved ({} cached, {} fetched); {} not found, {} lookup error(s), {} without reference",
            self.resolved(),
            self.total,
            self.resolved_from_cache,
            self.resolved_remotely,
            self.not_found,
            self.lookup_errors,
            self.no_reference
        )
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedBatch<T> {
    pub records: Vec<Enriched<T>>,
    pub summary: EnrichmentSummary,
}

impl<T> ResolvedBatch<T> {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            summary: EnrichmentSummary::default(),
        }
    }
}

/// Resolves counterparty references against the cache, fetching misses.
pub struct CounterpartyResolver<F, C> {
    fetcher: F,
    store: C,
    lookup_delay: Duration,
}

impl<F: RemoteFetcher, C: CounterpartyStore> CounterpartyResolver<F, C> {
    pub fn new(fetcher: F, store: C) -> Self {
        Self {
            fetcher,
            store,
            lookup_delay: Duration::from_millis(100),
        }
    }

    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Resolves every record in `records`, preserving input order.
    ///
    /// Per-key lookup failures end up in the records. Only cache I/O errors
    /// are returned.
    pub fn resolve_batch<T: CounterpartyReference>(
        &self,
        records: Vec<T>,
    ) -> Result<ResolvedBatch<T>> {
        let mut cache = CounterpartyCache::load(&self.store)?;
        let keys: Vec<Option<CounterpartyId>> =
            records.iter().map(|r| r.counterparty_ref()).collect();

        let mut seen = HashSet::new();
        let misses: Vec<CounterpartyId> = keys
            .iter()
            .flatten()
            .filter(|key| !cache.contains(key))
            .filter(|key| seen.insert((*key).clone()))
            .cloned()
            .collect();

        debug!(
            "{} record(s), {} distinct cache miss(es)",
            records.len(),
            misses.len()
        );

        let fetched = self.fetch_misses(&misses, &mut cache);
        let added = fetched.values().filter(|outcome| outcome.is_ok()).count();

        let mut summary = EnrichmentSummary {
            total: records.len(),
            remote_lookups: misses.len(),
            ..EnrichmentSummary::default()
        };

        let enriched: Vec<Enriched<T>> = records
            .into_iter()
            .zip(keys)
            .map(|(record, key)| {
                let resolution = match key {
                    None => {
                        summary.no_reference += 1;
                        Resolution::Failed(ResolutionFailure::NoReference)
                    }
                    Some(key) => match fetched.get(&key) {
                        Some(Ok(cp)) => {
                            summary.resolved_remotely += 1;
                            Resolution::Resolved(cp.clone())
                        }
                        Some(Err(failure)) => {
                            match failure {
                                ResolutionFailure::NotFound(_) => summary.not_found += 1,
                                _ => summary.lookup_errors += 1,
                            }
                            Resolution::Failed(failure.clone())
                        }
                        None => match cache.get(&key) {
                            Some(cp) => {
                                summary.resolved_from_cache += 1;
                                Resolution::Resolved(cp.clone())
                            }
                            None => {
                                summary.lookup_errors += 1;
                                Resolution::Failed(ResolutionFailure::LookupError {
                                    id: key,
                                    message: "not attempted".to_string(),
                                })
                            }
                        },
                    },
                };
                Enriched { record, resolution }
            })
            .collect();

        if added > 0 {
            cache.save(&self.store)?;
            info!("Counterparty cache grew by {} to {}", added, cache.len());
        }

        info!("Enrichment: {}", summary);
        Ok(ResolvedBatch {
            records: enriched,
            summary,
        })
    }

    fn fetch_misses(
        &self,
        misses: &[CounterpartyId],
        cache: &mut CounterpartyCache,
    ) -> HashMap<CounterpartyId, std::result::Result<Counterparty, ResolutionFailure>> {
        let mut outcomes = HashMap::new();

        for (index, key) in misses.iter().enumerate() {
            if index > 0 {
                pause(self.lookup_delay);
            }

            let outcome = match self.fetcher.fetch_counterparty(key) {
                Ok(mut cp) => {
                    // Stored under the id the records use, whatever the remote echoes back
                    cp.id = key.clone();
                    debug!("Fetched counterparty {}: {}", key, cp.display_name());
                    cache.insert(key.clone(), cp.clone());
                    Ok(cp)
                }
                Err(SyncError::NotFound(_)) => {
                    warn!("Counterparty {} not found", key);
                    Err(ResolutionFailure::NotFound(key.clone()))
                }
                Err(e) => {
                    warn!("Lookup of counterparty {} failed: {}", key, e);
                    Err(ResolutionFailure::LookupError {
                        id: key.clone(),
                        message: e.to_string(),
                    })
                }
            };
            outcomes.insert(key.clone(), outcome);
        }

        outcomes
    }
}

/// One entry of an `operations_with_contragents_*.json` export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct EnrichedOperationEntry {
    pub operation: Operation,
    pub contragent_name: Option<String>,
    pub contragent_inn: Option<String>,
    pub contragent_loaded: bool,
    pub error_message: String,
}

impl From<&Enriched<Operation>> for EnrichedOperationEntry {
    fn from(enriched: &Enriched<Operation>) -> Self {
        Self {
            operation: enriched.record.clone(),
            contragent_name: enriched.counterparty_name(),
            contragent_inn: enriched.counterparty_inn(),
            contragent_loaded: enriched.is_resolved(),
            error_message: enriched.failure_reason(),
        }
    }
}

/// Attaches counterparties to every operation of the stored statement.
pub struct OperationEnricher<F, S, C> {
    resolver: CounterpartyResolver<F, C>,
    snapshots: S,
    exports: ExportDir,
}

impl<F: RemoteFetcher, S: SnapshotStore, C: CounterpartyStore> OperationEnricher<F, S, C> {
    pub fn new(resolver: CounterpartyResolver<F, C>, snapshots: S, exports: ExportDir) -> Self {
        Self {
            resolver,
            snapshots,
            exports,
        }
    }

    pub fn enrich_statement(&self) -> Result<ResolvedBatch<Operation>> {
        self.enrich_statement_at(Local::now().naive_local())
    }

    pub fn enrich_statement_at(&self, now: NaiveDateTime) -> Result<ResolvedBatch<Operation>> {
        let Some(snapshot) = self.snapshots.load()? else {
            warn!("No bank statement snapshot to enrich");
            return Ok(ResolvedBatch::empty());
        };

        info!(
            "Enriching {} operation(s) with counterparties",
            snapshot.operations.len()
        );
        let batch = self.resolver.resolve_batch(snapshot.operations)?;

        if !batch.records.is_empty() {
            let entries: Vec<EnrichedOperationEntry> =
                batch.records.iter().map(EnrichedOperationEntry::from).collect();
            self.exports.write(ENRICHED_OPERATIONS_PREFIX, &entries, now)?;
        }
        Ok(batch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct EnrichedBillEntry {
    pub bill_id: i64,
    pub bill_number: Option<String>,
    pub bill_date: NaiveDateTime,
    pub bill_sum: Option<Decimal>,
    pub bill_status: String,
    pub contragent_name: Option<String>,
    pub contragent_inn: Option<String>,
    pub contragent_loaded: bool,
    pub error_message: String,
}

impl From<&Enriched<BillDetail>> for EnrichedBillEntry {
    fn from(enriched: &Enriched<BillDetail>) -> Self {
        let bill = &enriched.record;
        Self {
            bill_id: bill.id,
            bill_number: bill.number.clone(),
            bill_date: bill.doc_date,
            bill_sum: bill.sum,
            bill_status: bill.status.map(|s| s.label()).unwrap_or_default(),
            contragent_name: enriched.counterparty_name(),
            contragent_inn: enriched.counterparty_inn(),
            contragent_loaded: enriched.is_resolved(),
            error_message: enriched.failure_reason(),
        }
    }
}

/// Layout of an `enriched_bills_*.json` export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct EnrichedBillsExport {
    pub export_date: NaiveDateTime,
    pub total_bills: usize,
    pub bills_with_contragent: usize,
    pub bills_without_contragent: usize,
    pub enriched_bills: Vec<EnrichedBillEntry>,
}

impl EnrichedBillsExport {
    pub fn from_batch(batch: &ResolvedBatch<BillDetail>, export_date: NaiveDateTime) -> Self {
        let enriched_bills: Vec<EnrichedBillEntry> =
            batch.records.iter().map(EnrichedBillEntry::from).collect();
        let with = enriched_bills.iter().filter(|b| b.contragent_loaded).count();
        Self {
            export_date,
            total_bills: enriched_bills.len(),
            bills_with_contragent: with,
            bills_without_contragent: enriched_bills.len() - with,
            enriched_bills,
        }
    }
}

/// Details and counterparties for the bills of the latest bill export.
pub struct BillEnricher<F, C> {
    resolver: CounterpartyResolver<F, C>,
    exports: ExportDir,
    batch_size: usize,
    batch_delay: Duration,
    keep_exports: usize,
}

impl<F: RemoteFetcher, C: CounterpartyStore> BillEnricher<F, C> {
    pub fn new(resolver: CounterpartyResolver<F, C>, exports: ExportDir) -> Self {
        Self {
            resolver,
            exports,
            batch_size: 100,
            batch_delay: Duration::from_millis(300),
            keep_exports: 3,
        }
    }

    pub fn from_config(config: &ClientConfig, fetcher: F, store: C) -> Result<Self> {
        if config.detail_batch_size == 0 {
            return Err(SyncError::ValidationError(
                "detail_batch_size must be greater than zero".to_string(),
            ));
        }
        let resolver =
            CounterpartyResolver::new(fetcher, store).with_lookup_delay(config.lookup_delay());
        Ok(Self::new(resolver, ExportDir::new(config.bills_dir()))
            .with_batching(config.detail_batch_size, config.detail_batch_delay())
            .with_keep_exports(config.keep_enriched_exports))
    }

    pub fn with_batching(mut self, batch_size: usize, delay: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_delay = delay;
        self
    }

    pub fn with_keep_exports(mut self, keep: usize) -> Self {
        self.keep_exports = keep;
        self
    }

    pub fn enrich_latest(&self) -> Result<ResolvedBatch<BillDetail>> {
        self.enrich_latest_at(Local::now().naive_local())
    }

    pub fn enrich_latest_at(&self, now: NaiveDateTime) -> Result<ResolvedBatch<BillDetail>> {
        let Some(export) = self.exports.read_latest::<BillExport>(BILLS_PREFIX)? else {
            warn!("No bill export in {}", self.exports.path().display());
            return Ok(ResolvedBatch::empty());
        };

        let ids = export.bill_ids();
        info!("Enriching {} bill(s) from the latest export", ids.len());

        let details = self.fetch_details(&ids);
        if details.is_empty() {
            warn!("No bill details could be fetched");
            return Ok(ResolvedBatch::empty());
        }

        let batch = self.resolver.resolve_batch(details)?;
        let report = EnrichedBillsExport::from_batch(&batch, now);
        self.exports.write(ENRICHED_BILLS_PREFIX, &report, now)?;
        self.exports.prune(ENRICHED_BILLS_PREFIX, self.keep_exports)?;

        info!(
            "Bills with counterparty: {}, without: {}",
            report.bills_with_contragent, report.bills_without_contragent
        );
        Ok(batch)
    }

    /// Fetches details batch by batch. A failed batch is logged and skipped.
    pub fn fetch_details(&self, ids: &[i64]) -> Vec<BillDetail> {
        let mut details = Vec::with_capacity(ids.len());
        let mut failed_batches = 0;

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            if index > 0 {
                pause(self.batch_delay);
            }
            match self.resolver.fetcher().fetch_bill_details(chunk) {
                Ok(batch) => {
                    debug!("Detail batch {}: {} bill(s)", index + 1, batch.len());
                    details.extend(batch);
                }
                Err(e) => {
                    failed_batches += 1;
                    warn!(
                        "Detail batch {} ({} id(s)) failed, skipping: {}",
                        index + 1,
                        chunk.len(),
                        e
                    );
                }
            }
        }

        if failed_batches > 0 {
            warn!(
                "{} detail batch(es) failed; {} of {} bill(s) fetched",
                failed_batches,
                details.len(),
                ids.len()
            );
        }
        details
    }
}
