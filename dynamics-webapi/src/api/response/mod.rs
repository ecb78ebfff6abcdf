//! Response interpretation
//!
//! Turns a [`crate::api::ResponseEnvelope`] into the shape the caller expects
//! for the operation that produced it, or into a typed error.

pub mod annotations;
pub mod interpreter;
pub mod outcome;
pub mod paging;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use annotations::flatten_annotations;
pub use interpreter::interpret;
pub use outcome::{Outcome, SkipValue, classify};
pub use paging::parse_paging_cookie;

/// Interpreted result of one operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ApiResult {
    /// No content, or a write that was skipped by its precondition
    Empty,
    Bool(bool),
    /// Canonical GUID of a created or upserted record
    EntityId(String),
    Reference(EntityReference),
    Record(Value),
    Page(RecordPage),
    Count(u64),
    Text(String),
    /// Raw file content or a downloaded range
    Binary(Vec<u8>),
}

impl ApiResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, ApiResult::Empty)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ApiResult::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        match self {
            ApiResult::EntityId(id) => Some(id),
            ApiResult::Reference(reference) => Some(&reference.id),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            ApiResult::Count(count) => Some(*count),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Value> {
        match self {
            ApiResult::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_page(self) -> Option<RecordPage> {
        match self {
            ApiResult::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            ApiResult::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Target of a single-valued navigation property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReference {
    pub id: String,
    pub collection: String,
    #[serde(rename = "oDataContext", skip_serializing_if = "Option::is_none")]
    pub odata_context: Option<String>,
}

/// One page of records plus the envelope annotations that came with it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub value: Vec<Value>,
    #[serde(rename = "oDataContext", skip_serializing_if = "Option::is_none")]
    pub odata_context: Option<String>,
    #[serde(rename = "oDataNextLink", skip_serializing_if = "Option::is_none")]
    pub odata_next_link: Option<String>,
    #[serde(rename = "oDataDeltaLink", skip_serializing_if = "Option::is_none")]
    pub odata_delta_link: Option<String>,
    #[serde(rename = "oDataCount", skip_serializing_if = "Option::is_none")]
    pub odata_count: Option<u64>,
    #[serde(rename = "PagingInfo", skip_serializing_if = "Option::is_none")]
    pub paging_info: Option<PagingInfo>,
    #[serde(rename = "totalRecordCount", skip_serializing_if = "Option::is_none")]
    pub total_record_count: Option<u64>,
    #[serde(
        rename = "totalRecordCountLimitExceeded",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_record_count_limit_exceeded: Option<bool>,
    #[serde(rename = "moreRecords", skip_serializing_if = "Option::is_none")]
    pub more_records: Option<bool>,
}

/// Position of a FetchXML page and the cookie needed to request the next one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagingInfo {
    /// Escaped `<cookie ...>` fragment, ready to embed as an attribute value
    pub cookie: String,
    pub page: u32,
    pub next_page: u32,
}
