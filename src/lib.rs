//! # Moe Delo Sync
//!
//! Incremental synchronisation and counterparty enrichment for the Moe Delo
//! accounting REST API, with local JSON file caches.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: every bank operation seen so far (`bank_statement.json`) plus a
//!   metadata block (`statement_metadata.json`) recording the first/last operation date
//! - **Update window**: each sync re-fetches from `last operation - look-back` (14 days by
//!   default) so late-arriving and edited operations are caught
//! - **Merge**: fetched operations replace stored ones with the same id; nothing is
//!   duplicated and nothing older than the requested period is kept
//! - **Enrichment**: counterparty references are resolved through `contragents_data.json`,
//!   fetching misses remotely once per distinct id and growing the cache
//!
//! ## Example
//!
//! ```rust,ignore
//! use moedelo_sync::*;
//! use chrono::Months;
//!
//! let config = ClientConfig::from_env()?;
//! let client = MoeDeloClient::new(&config)?;
//!
//! let operations = sync_bank_statement(&config, &client, Months::new(12))?;
//! let enriched = enrich_bank_statement(&config, &client)?;
//! println!("{} operations, {}", operations.len(), enriched.summary);
//! ```

pub mod config;
pub mod enrich;
pub mod error;
pub mod exports;
pub mod fetcher;
pub mod schema;
pub mod store;
pub mod sync;
pub mod utils;
pub mod window;

#[cfg(feature = "remote")]
pub mod client;

#[cfg(feature = "remote")]
pub use client::MoeDeloClient;
pub use config::{ClientConfig, PagingPolicy, DEFAULT_BASE_URL};
pub use enrich::{
    BillEnricher, CounterpartyReference, CounterpartyResolver, Enriched, EnrichedBillEntry,
    EnrichedBillsExport, EnrichedOperationEntry, EnrichmentSummary, OperationEnricher,
    Resolution, ResolutionFailure, ResolvedBatch,
};
pub use error::{Result, SyncError};
pub use exports::{BillExport, ExportDir};
pub use fetcher::{decode_entity, decode_resource_list, fetch_all_pages, DecodePolicy, RemoteFetcher};
pub use schema::*;
pub use store::{
    CounterpartyCache, CounterpartyStore, FileCounterpartyStore, FileSnapshotStore, Snapshot,
    SnapshotMetadata, SnapshotStore,
};
pub use sync::{merge_records, BillSync, StatementSync, Timeline};
pub use window::{initial_window, update_window_start, DateWindow};

use chrono::Months;
use log::{debug, info};

/// File-backed pipelines built from a [`ClientConfig`].
pub struct SyncProcessor;

impl SyncProcessor {
    pub fn sync_bank_statement<F: RemoteFetcher>(
        config: &ClientConfig,
        fetcher: F,
        period: Months,
    ) -> Result<Vec<Operation>> {
        config.validate()?;
        info!(
            "Syncing bank statement into {}",
            config.storage_dir.display()
        );

        let store = FileSnapshotStore::new(&config.storage_dir);
        StatementSync::from_config(config, fetcher, store)?.sync(period)
    }

    pub fn enrich_bank_statement<F: RemoteFetcher>(
        config: &ClientConfig,
        fetcher: F,
    ) -> Result<ResolvedBatch<Operation>> {
        config.validate()?;

        let resolver = CounterpartyResolver::new(
            fetcher,
            FileCounterpartyStore::new(&config.storage_dir),
        )
        .with_lookup_delay(config.lookup_delay());
        let enricher = OperationEnricher::new(
            resolver,
            FileSnapshotStore::new(&config.storage_dir),
            ExportDir::new(&config.storage_dir),
        );
        enricher.enrich_statement()
    }

    /// Bills of the last twelve months, exported to the bills directory.
    pub fn sync_bills<F: RemoteFetcher>(config: &ClientConfig, fetcher: F) -> Result<Vec<Bill>> {
        config.validate()?;
        debug!("Bill exports go to {}", config.bills_dir().display());

        BillSync::from_config(config, fetcher)?.sync_last_year()
    }

    pub fn enrich_latest_bills<F: RemoteFetcher>(
        config: &ClientConfig,
        fetcher: F,
    ) -> Result<ResolvedBatch<BillDetail>> {
        config.validate()?;

        let store = FileCounterpartyStore::new(&config.storage_dir);
        BillEnricher::from_config(config, fetcher, store)?.enrich_latest()
    }
}

pub fn sync_bank_statement<F: RemoteFetcher>(
    config: &ClientConfig,
    fetcher: F,
    period: Months,
) -> Result<Vec<Operation>> {
    SyncProcessor::sync_bank_statement(config, fetcher, period)
}

pub fn enrich_bank_statement<F: RemoteFetcher>(
    config: &ClientConfig,
    fetcher: F,
) -> Result<ResolvedBatch<Operation>> {
    SyncProcessor::enrich_bank_statement(config, fetcher)
}

pub fn sync_bills<F: RemoteFetcher>(config: &ClientConfig, fetcher: F) -> Result<Vec<Bill>> {
    SyncProcessor::sync_bills(config, fetcher)
}

pub fn enrich_latest_bills<F: RemoteFetcher>(
    config: &ClientConfig,
    fetcher: F,
) -> Result<ResolvedBatch<BillDetail>> {
    SyncProcessor::enrich_latest_bills(config, fetcher)
}

/// JSON Schemas of every file this crate writes, keyed by file stem.
pub fn persisted_formats_schema() -> Result<serde_json::Value> {
    let mut formats = serde_json::Map::new();
    formats.insert(
        "bank_statement".to_string(),
        serde_json::to_value(schemars::schema_for!(Vec<Operation>))?,
    );
    formats.insert(
        "statement_metadata".to_string(),
        serde_json::to_value(schemars::schema_for!(SnapshotMetadata))?,
    );
    formats.insert(
        "contragents_data".to_string(),
        serde_json::to_value(schemars::schema_for!(Vec<Counterparty>))?,
    );
    formats.insert(
        "bills".to_string(),
        serde_json::to_value(schemars::schema_for!(BillExport))?,
    );
    formats.insert(
        "enriched_bills".to_string(),
        serde_json::to_value(schemars::schema_for!(EnrichedBillsExport))?,
    );
    formats.insert(
        "operations_with_contragents".to_string(),
        serde_json::to_value(schemars::schema_for!(Vec<EnrichedOperationEntry>))?,
    );
    Ok(serde_json::Value::Object(formats))
}
