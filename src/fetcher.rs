use crate::config::PagingPolicy;
use crate::error::{Result, SyncError};
use crate::schema::{Bill, BillDetail, Counterparty, CounterpartyId, Operation};
use crate::utils::pause;
use crate::window::DateWindow;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Remote source of accounting entities.
///
/// Implementations own the transport and the wire envelope; the engines only
/// see flat, decoded records. Pages are 1-based.
pub trait RemoteFetcher {
    fn fetch_operations_page(
        &self,
        window: &DateWindow,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Operation>>;

    fn fetch_bills_page(
        &self,
        window: &DateWindow,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Bill>>;

    fn fetch_bill_details(&self, ids: &[i64]) -> Result<Vec<BillDetail>>;

    /// `SyncError::NotFound` when the counterparty does not exist remotely.
    fn fetch_counterparty(&self, id: &CounterpartyId) -> Result<Counterparty>;
}

impl<T: RemoteFetcher + ?Sized> RemoteFetcher for &T {
    fn fetch_operations_page(
        &self,
        window: &DateWindow,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Operation>> {
        (**self).fetch_operations_page(window, page, page_size)
    }

    fn fetch_bills_page(
        &self,
        window: &DateWindow,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Bill>> {
        (**self).fetch_bills_page(window, page, page_size)
    }

    fn fetch_bill_details(&self, ids: &[i64]) -> Result<Vec<BillDetail>> {
        (**self).fetch_bill_details(ids)
    }

    fn fetch_counterparty(&self, id: &CounterpartyId) -> Result<Counterparty> {
        (**self).fetch_counterparty(id)
    }
}

/// What to do with a page whose body could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Abort the whole fetch.
    Strict,
    /// Log it and treat the page as empty, which also ends pagination.
    Lenient,
}

/// Walks pages `1..` until one comes back shorter than `policy.page_size`.
///
/// Each page is retried on transient errors up to `policy.max_attempts` with
/// linear backoff. Exhausting the budget fails the whole fetch; nothing
/// fetched so far is returned.
pub fn fetch_all_pages<T, F>(
    label: &str,
    policy: &PagingPolicy,
    decode_policy: DecodePolicy,
    mut fetch_page: F,
) -> Result<Vec<T>>
where
    F: FnMut(usize, usize) -> Result<Vec<T>>,
{
    policy.validate(label)?;

    let mut all = Vec::new();
    let mut page = 1;

    loop {
        debug!("Requesting {} page {}", label, page);

        let records = match fetch_with_retry(label, page, policy, &mut fetch_page) {
            Ok(records) => records,
            Err(SyncError::Decode(msg)) if decode_policy == DecodePolicy::Lenient => {
                warn!(
                    "Could not decode {} page {}, treating as empty: {}",
                    label, page, msg
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let received = records.len();
        all.extend(records);

        if received < policy.page_size {
            break;
        }

        page += 1;
        pause(policy.page_delay());
    }

    info!("Fetched {} {} record(s) in {} page(s)", all.len(), label, page);
    Ok(all)
}

fn fetch_with_retry<T, F>(
    label: &str,
    page: usize,
    policy: &PagingPolicy,
    fetch_page: &mut F,
) -> Result<Vec<T>>
where
    F: FnMut(usize, usize) -> Result<Vec<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match fetch_page(page, policy.page_size) {
            Ok(records) => return Ok(records),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    "{} page {} failed (attempt {}/{}): {}",
                    label, page, attempt, policy.max_attempts, e
                );
                pause(policy.backoff(attempt));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decodes a listing response into a flat list.
///
/// Accepted shapes: a bare array, `{"ResourceList": [...]}`, a wrapper object
/// around either (e.g. `{"data": {...}}`), and `null`.
pub fn decode_resource_list<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        SyncError::Decode(format!("{} (body starts with: {})", e, preview(body)))
    })?;
    let list = unwrap_envelope(value)?;
    serde_json::from_value(list).map_err(|e| SyncError::Decode(e.to_string()))
}

/// Decodes a single entity. A `null` body means the entity does not exist.
pub fn decode_entity<T: DeserializeOwned>(body: &str, what: &str) -> Result<T> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        SyncError::Decode(format!("{} (body starts with: {})", e, preview(body)))
    })?;
    if value.is_null() {
        return Err(SyncError::NotFound(what.to_string()));
    }
    serde_json::from_value(value).map_err(|e| SyncError::Decode(e.to_string()))
}

fn unwrap_envelope(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Array(_) => Ok(value),
        Value::Object(mut map) => {
            if let Some(list) = map.remove("ResourceList") {
                return unwrap_envelope(list);
            }
            for key in ["data", "Data"] {
                if let Some(inner) = map.remove(key) {
                    return unwrap_envelope(inner);
                }
            }
            // Fall back to the first nested container
            let first = map
                .into_iter()
                .map(|(_, v)| v)
                .find(|v| v.is_array() || v.is_object());
            match first {
                Some(inner) => unwrap_envelope(inner),
                None => Err(SyncError::Decode(
                    "response object holds no record list".to_string(),
                )),
            }
        }
        other => Err(SyncError::Decode(format!(
            "expected a record list, got {}",
            other
        ))),
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
