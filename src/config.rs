use crate::error::{Result, SyncError};
use crate::utils::read_json;
use crate::window::DEFAULT_LOOKBACK_DAYS;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://restapi.moedelo.org";

/// Upper bound for `lookback_days`, roughly a century.
pub const MAX_LOOKBACK_DAYS: i64 = 36_500;

/// How a paged listing endpoint is walked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PagingPolicy {
    #[schemars(description = "Records requested per page. A shorter page ends pagination.")]
    pub page_size: usize,

    #[schemars(description = "Attempts per page (first try included) before the whole fetch fails.")]
    pub max_attempts: u32,

    #[schemars(description = "Linear backoff step in milliseconds: attempt N waits N * step.")]
    pub retry_backoff_ms: u64,

    #[schemars(description = "Courtesy delay between consecutive pages, in milliseconds.")]
    pub page_delay_ms: u64,
}

impl PagingPolicy {
    pub fn statement_default() -> Self {
        Self {
            page_size: 1000,
            max_attempts: 2,
            retry_backoff_ms: 1000,
            page_delay_ms: 200,
        }
    }

    pub fn bill_default() -> Self {
        Self {
            page_size: 100,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            page_delay_ms: 300,
        }
    }

    /// Same page size and attempt budget with every delay zeroed.
    pub fn without_delays(mut self) -> Self {
        self.retry_backoff_ms = 0;
        self.page_delay_ms = 0;
        self
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }

    pub fn validate(&self, label: &str) -> Result<()> {
        if self.page_size == 0 {
            return Err(SyncError::ValidationError(format!(
                "{}: page_size must be greater than zero",
                label
            )));
        }
        if self.max_attempts == 0 {
            return Err(SyncError::ValidationError(format!(
                "{}: max_attempts must be at least 1",
                label
            )));
        }
        Ok(())
    }
}

/// Everything the sync and enrichment engines need to run.
///
/// Passed explicitly into every component; there is no process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ClientConfig {
    #[schemars(description = "Value of the md-api-key header.")]
    pub api_key: String,

    pub base_url: String,

    #[schemars(description = "Directory holding the statement snapshot and the counterparty cache.")]
    pub storage_dir: PathBuf,

    #[schemars(description = "Directory for bill exports. Defaults to <storage_dir>/Bills.")]
    pub bills_dir: Option<PathBuf>,

    pub statement_paging: PagingPolicy,

    pub bill_paging: PagingPolicy,

    #[schemars(description = "Delay between single counterparty lookups, in milliseconds.")]
    pub lookup_delay_ms: u64,

    #[schemars(description = "Bill ids per bulk detail request.")]
    pub detail_batch_size: usize,

    pub detail_batch_delay_ms: u64,

    #[schemars(description = "Trailing overlap re-fetched on every statement update, in days.")]
    pub lookback_days: i64,

    pub request_timeout_secs: u64,

    pub detail_timeout_secs: u64,

    #[schemars(description = "Registry OperationSource filter (1 = settlement account).")]
    pub operation_source: i32,

    #[schemars(description = "Registry OperationType filter.")]
    pub operation_type: i32,

    pub keep_bill_exports: usize,

    pub keep_enriched_exports: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            storage_dir: PathBuf::from("."),
            bills_dir: None,
            statement_paging: PagingPolicy::statement_default(),
            bill_paging: PagingPolicy::bill_default(),
            lookup_delay_ms: 100,
            detail_batch_size: 100,
            detail_batch_delay_ms: 300,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            request_timeout_secs: 30,
            detail_timeout_secs: 60,
            operation_source: 1,
            operation_type: 102,
            keep_bill_exports: 5,
            keep_enriched_exports: 3,
        }
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_bills_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bills_dir = Some(dir.into());
        self
    }

    /// Zeroes every courtesy delay and backoff. Meant for tests and local mocks.
    pub fn without_delays(mut self) -> Self {
        self.statement_paging = self.statement_paging.without_delays();
        self.bill_paging = self.bill_paging.without_delays();
        self.lookup_delay_ms = 0;
        self.detail_batch_delay_ms = 0;
        self
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `MOEDELO_API_KEY`, `MOEDELO_BASE_URL` and `MOEDELO_STORAGE_DIR`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("MOEDELO_API_KEY").map_err(|_| {
            SyncError::ValidationError("MOEDELO_API_KEY must be set".to_string())
        })?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("MOEDELO_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(dir) = std::env::var("MOEDELO_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(SyncError::ValidationError(
                "api_key must not be empty".to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(SyncError::ValidationError(
                "base_url must not be empty".to_string(),
            ));
        }
        if self.detail_batch_size == 0 {
            return Err(SyncError::ValidationError(
                "detail_batch_size must be greater than zero".to_string(),
            ));
        }
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days) {
            return Err(SyncError::ValidationError(format!(
                "lookback_days must be between 0 and {}, got {}",
                MAX_LOOKBACK_DAYS, self.lookback_days
            )));
        }
        self.statement_paging.validate("statement_paging")?;
        self.bill_paging.validate("bill_paging")?;
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn bills_dir(&self) -> PathBuf {
        self.bills_dir
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("Bills"))
    }

    /// Look-back as a duration, clamped to `0..=MAX_LOOKBACK_DAYS` days.
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.lookback_days.clamp(0, MAX_LOOKBACK_DAYS))
            .unwrap_or_else(|| chrono::Duration::days(DEFAULT_LOOKBACK_DAYS))
    }

    pub fn lookup_delay(&self) -> Duration {
        Duration::from_millis(self.lookup_delay_ms)
    }

    pub fn detail_batch_delay(&self) -> Duration {
        Duration::from_millis(self.detail_batch_delay_ms)
    }

    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(ClientConfig);
        serde_json::to_value(&schema).unwrap_or(serde_json::Value::Null)
    }
}
