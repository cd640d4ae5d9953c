use crate::config::ClientConfig;
use crate::error::{Result, SyncError};
use crate::fetcher::{decode_entity, decode_resource_list, RemoteFetcher};
use crate::schema::{Bill, BillDetail, Counterparty, CounterpartyId, Operation};
use crate::utils::API_DATE_FORMAT;
use crate::window::DateWindow;
use log::debug;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use std::time::Duration;

const API_KEY_HEADER: &str = "md-api-key";

const REGISTRY_PATH: &str = "/money/api/v1/Registry";
const BILLS_PATH: &str = "/accounting/api/v1/sales/bill";
const BILLS_BY_IDS_PATH: &str = "/accounting/api/v1/sales/bill/byIds";
const KONTRAGENT_PATH: &str = "/kontragents/api/v1/kontragent";

/// Blocking HTTP client for the Moe Delo REST API.
#[derive(Clone)]
pub struct MoeDeloClient {
    client: Client,
    base_url: String,
    operation_source: i32,
    operation_type: i32,
    detail_timeout: Duration,
}

impl MoeDeloClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(config.api_key.trim()).map_err(|e| {
            SyncError::ValidationError(format!("api_key is not a valid header value: {}", e))
        })?;
        headers.insert(API_KEY_HEADER, key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            operation_source: config.operation_source,
            operation_type: config.operation_type,
            detail_timeout: Duration::from_secs(config.detail_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The id goes in as one percent-encoded path segment.
    fn counterparty_url(&self, id: &CounterpartyId) -> Result<Url> {
        let mut url = Url::parse(&self.url(KONTRAGENT_PATH))
            .map_err(|e| SyncError::ValidationError(format!("invalid base_url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                SyncError::ValidationError("base_url cannot carry a path".to_string())
            })?
            .push(id.as_str());
        Ok(url)
    }

    fn send(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;

        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(body));
        }
        if !status.is_success() {
            return Err(SyncError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

impl RemoteFetcher for MoeDeloClient {
    fn fetch_operations_page(
        &self,
        window: &DateWindow,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Operation>> {
        let offset = (page.saturating_sub(1)) * page_size;
        debug!("GET registry {} offset {}", window, offset);

        let request = self.client.get(self.url(REGISTRY_PATH)).query(&[
            ("StartDate", window.start.format(API_DATE_FORMAT).to_string()),
            ("EndDate", window.end.format(API_DATE_FORMAT).to_string()),
            ("OperationSource", self.operation_source.to_string()),
            ("OperationType", self.operation_type.to_string()),
            ("Limit", page_size.to_string()),
            ("Offset", offset.to_string()),
        ]);
        decode_resource_list(&self.send(request)?)
    }

    fn fetch_bills_page(
        &self,
        window: &DateWindow,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Bill>> {
        debug!("GET bills {} page {}", window, page);

        let request = self.client.get(self.url(BILLS_PATH)).query(&[
            ("docAfterDate", window.start.format(API_DATE_FORMAT).to_string()),
            ("docBeforeDate", window.end.format(API_DATE_FORMAT).to_string()),
            ("pageNo", page.to_string()),
            ("pageSize", page_size.to_string()),
        ]);
        decode_resource_list(&self.send(request)?)
    }

    fn fetch_bill_details(&self, ids: &[i64]) -> Result<Vec<BillDetail>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!("POST bill details for {} id(s)", ids.len());

        let request = self
            .client
            .post(self.url(BILLS_BY_IDS_PATH))
            .timeout(self.detail_timeout)
            .json(ids);
        decode_resource_list(&self.send(request)?)
    }

    fn fetch_counterparty(&self, id: &CounterpartyId) -> Result<Counterparty> {
        debug!("GET kontragent {}", id);

        let url = self.counterparty_url(id)?;
        let body = self.send(self.client.get(url))?;
        decode_entity(&body, &format!("kontragent {}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_is_rejected() {
        let result = MoeDeloClient::new(&ClientConfig::default());
        assert!(matches!(result, Err(SyncError::ValidationError(_))));
    }

    #[test]
    fn test_urls_use_trimmed_base() {
        let config = ClientConfig::new("key").with_base_url("https://api.example.test/");
        let client = MoeDeloClient::new(&config).unwrap();
        assert_eq!(
            client.url(REGISTRY_PATH),
            "https://api.example.test/money/api/v1/Registry"
        );
    }

    #[test]
    fn test_counterparty_id_is_encoded_as_one_segment() {
        let client = MoeDeloClient::new(&ClientConfig::new("key")).unwrap();

        let plain = client.counterparty_url(&CounterpartyId::new("12345")).unwrap();
        assert_eq!(
            plain.as_str(),
            "https://restapi.moedelo.org/kontragents/api/v1/kontragent/12345"
        );

        let tricky = client
            .counterparty_url(&CounterpartyId::new("1/../2?x#y"))
            .unwrap();
        assert_eq!(tricky.path_segments().unwrap().count(), 5);
        assert!(tricky.query().is_none());
        assert!(tricky.fragment().is_none());
        assert!(tricky.path().ends_with("/kontragent/1%2F..%2F2%3Fx%23y"));
    }
}
