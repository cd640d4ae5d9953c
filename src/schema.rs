use crate::utils::lenient_datetime;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque counterparty identifier.
///
/// The API encodes the same id as an integer in some payloads (bill details)
/// and as a string in others (registry, kontragent endpoint). Both decode into
/// the same string key; application code never sees the wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct CounterpartyId(String);

impl CounterpartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CounterpartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for CounterpartyId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for CounterpartyId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CounterpartyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for CounterpartyId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum WireId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match WireId::deserialize(deserializer)? {
            WireId::Text(id) => CounterpartyId(id),
            WireId::Signed(id) => CounterpartyId(id.to_string()),
            WireId::Unsigned(id) => CounterpartyId(id.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "i32", into = "i32")]
pub enum CounterpartyKind {
    LegalEntity,
    Individual,
    SoleProprietor,
    /// Any code the API adds later, kept verbatim.
    Other(i32),
    #[default]
    Unspecified,
}

impl From<i32> for CounterpartyKind {
    fn from(code: i32) -> Self {
        match code {
            0 => CounterpartyKind::Unspecified,
            1 => CounterpartyKind::LegalEntity,
            2 => CounterpartyKind::Individual,
            3 => CounterpartyKind::SoleProprietor,
            other => CounterpartyKind::Other(other),
        }
    }
}

impl From<CounterpartyKind> for i32 {
    fn from(kind: CounterpartyKind) -> Self {
        match kind {
            CounterpartyKind::Unspecified => 0,
            CounterpartyKind::LegalEntity => 1,
            CounterpartyKind::Individual => 2,
            CounterpartyKind::SoleProprietor => 3,
            CounterpartyKind::Other(code) => code,
        }
    }
}

impl JsonSchema for CounterpartyKind {
    fn schema_name() -> String {
        "CounterpartyKind".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <i32>::json_schema(gen)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ContactInfo {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// A counterparty ("kontragent") as returned by the kontragent endpoint and
/// stored in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct Counterparty {
    pub id: CounterpartyId,
    #[serde(default)]
    pub name: Option<String>,
    /// Taxpayer identification number (INN)
    #[serde(default)]
    pub inn: Option<String>,
    /// Tax registration reason code (KPP)
    #[serde(default)]
    pub kpp: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(rename = "Type", default)]
    pub kind: CounterpartyKind,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub contact_info: Option<ContactInfo>,
    #[serde(default, deserialize_with = "lenient_datetime::option::deserialize")]
    #[schemars(with = "Option<NaiveDateTime>")]
    pub updated: Option<NaiveDateTime>,
}

impl Counterparty {
    pub fn new(id: impl Into<CounterpartyId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            inn: None,
            kpp: None,
            full_name: None,
            short_name: None,
            kind: CounterpartyKind::Unspecified,
            address: None,
            contact_info: None,
            updated: None,
        }
    }

    /// Best available human-readable name.
    pub fn display_name(&self) -> &str {
        [&self.name, &self.short_name, &self.full_name]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.id.as_str())
    }
}

/// Terse counterparty reference embedded in a bank operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ContractorRef {
    #[serde(default)]
    pub id: Option<CounterpartyId>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentBase {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub document_type: i32,
}

/// A bank statement operation from the money registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct Operation {
    pub id: i64,
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub date: NaiveDateTime,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub contractor: Option<ContractorRef>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sum: Decimal,
    #[serde(default)]
    pub bank_account_id: Option<i64>,
    /// 1 = settlement account
    #[serde(default)]
    pub operation_source: Option<i32>,
    #[serde(default)]
    pub operation_type: Option<i32>,
    #[serde(default)]
    pub document_base: Option<DocumentBase>,
}

impl Operation {
    pub fn new(id: i64, date: NaiveDateTime, sum: Decimal) -> Self {
        Self {
            id,
            date,
            number: None,
            contractor: None,
            description: None,
            sum,
            bank_account_id: None,
            operation_source: None,
            operation_type: None,
            document_base: None,
        }
    }

    pub fn with_contractor(mut self, id: impl Into<CounterpartyId>, name: impl Into<String>) -> Self {
        self.contractor = Some(ContractorRef {
            id: Some(id.into()),
            name: Some(name.into()),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum BillStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Other(i32),
}

impl BillStatus {
    pub fn label(&self) -> String {
        match self {
            BillStatus::Unpaid => "Unpaid".to_string(),
            BillStatus::PartiallyPaid => "Partially paid".to_string(),
            BillStatus::Paid => "Paid".to_string(),
            BillStatus::Other(code) => format!("Unknown ({})", code),
        }
    }
}

impl From<i32> for BillStatus {
    fn from(code: i32) -> Self {
        match code {
            4 => BillStatus::Unpaid,
            5 => BillStatus::PartiallyPaid,
            6 => BillStatus::Paid,
            other => BillStatus::Other(other),
        }
    }
}

impl From<BillStatus> for i32 {
    fn from(status: BillStatus) -> Self {
        match status {
            BillStatus::Unpaid => 4,
            BillStatus::PartiallyPaid => 5,
            BillStatus::Paid => 6,
            BillStatus::Other(code) => code,
        }
    }
}

impl JsonSchema for BillStatus {
    fn schema_name() -> String {
        "BillStatus".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <i32>::json_schema(gen)
    }
}

/// Sales bill as listed by the paged bill endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct Bill {
    pub id: i64,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub doc_date: NaiveDateTime,
    #[serde(default)]
    pub status: Option<BillStatus>,
    #[serde(rename = "KontragentId", default)]
    pub counterparty_id: Option<CounterpartyId>,
    #[serde(default)]
    pub sum: Option<Decimal>,
    #[serde(default)]
    pub paid_sum: Option<Decimal>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct BillItem {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub count: Option<Decimal>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(rename = "Type", default)]
    pub item_type: i32,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub discount_rate: Option<Decimal>,
    #[serde(default)]
    pub nds_type: i32,
    #[serde(default)]
    pub sum_without_nds: Option<Decimal>,
    #[serde(default)]
    pub nds_sum: Option<Decimal>,
    #[serde(default)]
    pub sum_with_nds: Option<Decimal>,
    #[serde(default)]
    pub stock_product_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct BillPayment {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime::option::deserialize")]
    #[schemars(with = "Option<NaiveDateTime>")]
    pub date: Option<NaiveDateTime>,
    #[serde(default)]
    pub sum: Option<Decimal>,
}

/// Creation/modification trail of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentContext {
    #[serde(default, deserialize_with = "lenient_datetime::option::deserialize")]
    #[schemars(with = "Option<NaiveDateTime>")]
    pub create_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "lenient_datetime::option::deserialize")]
    #[schemars(with = "Option<NaiveDateTime>")]
    pub modify_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub modify_user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct SettlementAccount {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub account_number: Option<String>,
}

/// Full bill representation from the `byIds` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct BillDetail {
    pub id: i64,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    #[schemars(with = "NaiveDateTime")]
    pub doc_date: NaiveDateTime,
    #[serde(default)]
    pub items: Vec<BillItem>,
    #[serde(default)]
    pub payments: Vec<BillPayment>,
    #[serde(default)]
    pub context: Option<DocumentContext>,
    #[serde(default)]
    pub status: Option<BillStatus>,
    #[serde(rename = "Type", default)]
    pub bill_type: Option<i32>,
    /// Integer on the wire here, string in the bill list.
    #[serde(rename = "KontragentId", default)]
    pub counterparty_id: Option<CounterpartyId>,
    #[serde(default)]
    pub settlement_account: Option<SettlementAccount>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub stock_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_datetime::option::deserialize")]
    #[schemars(with = "Option<NaiveDateTime>")]
    pub dead_line: Option<NaiveDateTime>,
    #[serde(default)]
    pub additional_info: Option<String>,
    #[serde(default)]
    pub contract_subject: Option<String>,
    #[serde(default)]
    pub nds_position_type: Option<i32>,
    #[serde(default)]
    pub is_covered: Option<bool>,
    #[serde(default)]
    pub use_stamp_and_sign: bool,
    #[serde(default)]
    pub sum: Option<Decimal>,
    #[serde(default)]
    pub paid_sum: Option<Decimal>,
    #[serde(default)]
    pub comment: Option<String>,
}
