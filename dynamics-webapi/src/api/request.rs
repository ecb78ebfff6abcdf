//! Request model: the semantic description of one Web API operation
//!
//! A [`Request`] says *what* should happen (which collection, which key, which
//! columns, which conditional header). The composers in `api::query` and
//! `api::headers` turn it into a [`super::ComposedRequest`] without mutating it.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::validation::{ParamType, json_parameter_check, number_parameter_check};
use crate::error::Result;

/// HTTP method of a composed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of logical operation; drives composition special cases and response handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Create,
    Retrieve,
    RetrieveMultiple,
    Count,
    Update,
    UpdateSingleProperty,
    Upsert,
    Delete,
    Associate,
    Disassociate,
    CallFunction,
    CallAction,
    Fetch,
    /// Caller-defined request; no operation-specific interpretation
    #[default]
    Execute,
}

impl OperationKind {
    /// Name used in diagnostic messages
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Retrieve => "retrieve",
            Self::RetrieveMultiple => "retrieveMultiple",
            Self::Count => "count",
            Self::Update => "update",
            Self::UpdateSingleProperty => "updateSingleProperty",
            Self::Upsert => "upsert",
            Self::Delete => "deleteRecord",
            Self::Associate => "associate",
            Self::Disassociate => "disassociate",
            Self::CallFunction => "callFunction",
            Self::CallAction => "callAction",
            Self::Fetch => "fetch",
            Self::Execute => "execute",
        }
    }

    /// HTTP method used when the request does not override it
    pub fn default_method(&self) -> Method {
        match self {
            Self::Create | Self::Associate | Self::CallAction => Method::Post,
            Self::Update | Self::Upsert => Method::Patch,
            Self::UpdateSingleProperty => Method::Put,
            Self::Delete | Self::Disassociate => Method::Delete,
            Self::Retrieve
            | Self::RetrieveMultiple
            | Self::Count
            | Self::CallFunction
            | Self::Fetch
            | Self::Execute => Method::Get,
        }
    }
}

/// Conditional header carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conditional {
    None,
    IfMatch,
    IfNoneMatch,
}

/// `Prefer` values given directly on the request: one comma-joined string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prefer {
    Text(String),
    List(Vec<String>),
}

impl Prefer {
    /// Individual trimmed tokens, splitting comma-joined strings
    pub fn tokens(&self) -> Vec<String> {
        let items: Vec<&str> = match self {
            Prefer::Text(text) => vec![text.as_str()],
            Prefer::List(list) => list.iter().map(String::as_str).collect(),
        };

        items
            .into_iter()
            .flat_map(|item| item.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// `$expand` value: raw OData text or structured sub-requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpandSpec {
    Raw(String),
    Items(Vec<Expand>),
}

/// Restricted request describing one expanded navigation property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Expand {
    pub property: String,
    pub select: Vec<String>,
    pub filter: Option<String>,
    pub top: Option<u32>,
    pub order_by: Vec<String>,
    pub expand: Option<ExpandSpec>,
}

impl Expand {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ..Default::default()
        }
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    pub fn order_by<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = order.into_iter().map(Into::into).collect();
        self
    }

    /// Add a nested expand below this one
    pub fn expand(mut self, nested: Expand) -> Self {
        match &mut self.expand {
            Some(ExpandSpec::Items(items)) => items.push(nested),
            _ => self.expand = Some(ExpandSpec::Items(vec![nested])),
        }
        self
    }
}

/// Request payload for write operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    #[serde(skip)]
    Binary(Vec<u8>),
}

/// One logical Web API operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Request {
    pub kind: OperationKind,
    /// Overrides the method implied by `kind`
    pub method: Option<Method>,

    /// Full or data-API-relative URL; bypasses collection/key composition
    pub url: Option<String>,
    pub collection: Option<String>,
    pub key: Option<String>,
    /// Deprecated alias of `key`
    pub id: Option<String>,
    /// Allows composition without a collection (unbound functions/actions)
    pub unbound: bool,
    /// Segment appended after collection and key (function/action names, `$ref`)
    pub additional_path: Option<String>,

    pub select: Vec<String>,
    pub filter: Option<String>,
    pub order_by: Vec<String>,
    pub top: Option<u32>,
    pub count: bool,
    pub apply: Option<String>,
    pub expand: Option<ExpandSpec>,

    pub navigation_property: Option<String>,
    pub navigation_property_key: Option<String>,
    pub metadata_attribute_type: Option<String>,
    pub saved_query: Option<String>,
    pub user_query: Option<String>,
    pub partition_id: Option<String>,
    pub download_size: Option<String>,
    pub query_params: Vec<String>,
    pub file_name: Option<String>,
    pub field_name: Option<String>,

    pub ifmatch: Option<String>,
    pub ifnonematch: Option<String>,
    pub impersonate: Option<String>,
    #[serde(rename = "impersonateAAD")]
    pub impersonate_aad: Option<String>,

    pub return_representation: Option<bool>,
    pub include_annotations: Option<String>,
    pub max_page_size: Option<u32>,
    pub track_changes: bool,
    pub continue_on_error: bool,
    pub prefer: Option<Prefer>,

    pub duplicate_detection: bool,
    pub bypass_custom_plugin_execution: bool,
    pub no_cache: bool,
    pub merge_labels: bool,
    pub content_range: Option<String>,
    pub range: Option<String>,
    pub chunked_transfer: bool,
    /// Extra headers; composed headers take precedence
    pub headers: BTreeMap<String, String>,

    pub content_id: Option<String>,
    /// `Some(false)` keeps a non-GET request out of batch changesets
    pub in_change_set: Option<bool>,

    pub data: Option<Payload>,

    pub fetch_xml: Option<String>,
    pub page_number: Option<u32>,
    pub paging_cookie: Option<String>,

    #[serde(rename = "async")]
    pub is_async: Option<bool>,
    pub timeout_ms: Option<u64>,
}

/// Field name and expected JSON shape, checked before deserializing loose input
const LOOSE_FIELDS: &[(&str, ParamType)] = &[
    ("collection", ParamType::String),
    ("key", ParamType::String),
    ("id", ParamType::String),
    ("url", ParamType::String),
    ("select", ParamType::Array),
    ("filter", ParamType::String),
    ("orderBy", ParamType::Array),
    ("top", ParamType::Number),
    ("count", ParamType::Boolean),
    ("apply", ParamType::String),
    ("expand", ParamType::StringOrArray),
    ("navigationProperty", ParamType::String),
    ("navigationPropertyKey", ParamType::String),
    ("savedQuery", ParamType::String),
    ("userQuery", ParamType::String),
    ("queryParams", ParamType::Array),
    ("ifmatch", ParamType::String),
    ("ifnonematch", ParamType::String),
    ("impersonate", ParamType::String),
    ("impersonateAAD", ParamType::String),
    ("returnRepresentation", ParamType::Boolean),
    ("includeAnnotations", ParamType::String),
    ("maxPageSize", ParamType::Number),
    ("trackChanges", ParamType::Boolean),
    ("prefer", ParamType::StringOrArray),
    ("duplicateDetection", ParamType::Boolean),
    ("bypassCustomPluginExecution", ParamType::Boolean),
    ("noCache", ParamType::Boolean),
    ("mergeLabels", ParamType::Boolean),
    ("contentId", ParamType::String),
    ("inChangeSet", ParamType::Boolean),
    ("fetchXml", ParamType::String),
    ("pageNumber", ParamType::Number),
    ("async", ParamType::Boolean),
    ("timeoutMs", ParamType::Number),
    ("headers", ParamType::Object),
];

impl Request {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Parse a request from loosely-typed JSON, reporting type mismatches as
    /// parameter errors named after the offending field.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("kind")
            .cloned()
            .map(serde_json::from_value::<OperationKind>)
            .transpose()?
            .unwrap_or_default();
        let function_name = kind.function_name();

        for (field, expected) in LOOSE_FIELDS {
            if let Some(field_value) = value.get(*field) {
                let parameter_name = format!("request.{}", field);
                json_parameter_check(field_value, *expected, function_name, &parameter_name)?;
                if let Some(number) = field_value.as_i64() {
                    number_parameter_check(number, function_name, &parameter_name)?;
                }
            }
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Create a new record
    pub fn create(collection: impl Into<String>, data: Value) -> Self {
        Self::new(OperationKind::Create)
            .collection(collection)
            .data(data)
    }

    /// Retrieve one record by key
    pub fn retrieve(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(OperationKind::Retrieve)
            .collection(collection)
            .key(key)
    }

    /// Query a collection
    pub fn retrieve_multiple(collection: impl Into<String>) -> Self {
        Self::new(OperationKind::RetrieveMultiple).collection(collection)
    }

    /// Count records in a collection, optionally filtered
    pub fn count(collection: impl Into<String>) -> Self {
        Self::new(OperationKind::Count).collection(collection)
    }

    /// Update an existing record
    pub fn update(collection: impl Into<String>, key: impl Into<String>, data: Value) -> Self {
        Self::new(OperationKind::Update)
            .collection(collection)
            .key(key)
            .data(data)
    }

    /// Replace the value of a single column with `PUT .../column`
    pub fn update_single_property(
        collection: impl Into<String>,
        key: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        let mut request = Self::new(OperationKind::UpdateSingleProperty)
            .collection(collection)
            .key(key)
            .data(serde_json::json!({ "value": value }));
        request.field_name = Some(field.into());
        request
    }

    /// Create or update a record addressed by key
    pub fn upsert(collection: impl Into<String>, key: impl Into<String>, data: Value) -> Self {
        Self::new(OperationKind::Upsert)
            .collection(collection)
            .key(key)
            .data(data)
    }

    /// Delete a record
    pub fn delete(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete)
            .collection(collection)
            .key(key)
    }

    /// Associate a related record through a collection-valued navigation property.
    ///
    /// `POST /collection(key)/relationship/$ref` with `{"@odata.id": "related(key)"}`
    pub fn associate(
        collection: impl Into<String>,
        key: impl Into<String>,
        relationship: impl Into<String>,
        related_collection: impl Into<String>,
        related_key: impl Into<String>,
    ) -> Self {
        let related = format!("{}({})", related_collection.into(), related_key.into());
        Self::new(OperationKind::Associate)
            .collection(collection)
            .key(key)
            .additional_path(format!("{}/$ref", relationship.into()))
            .data(serde_json::json!({ "@odata.id": related }))
    }

    /// Remove an association. Without `related_key` the single-valued
    /// navigation property itself is cleared.
    pub fn disassociate(
        collection: impl Into<String>,
        key: impl Into<String>,
        relationship: impl Into<String>,
        related_key: Option<String>,
    ) -> Self {
        let relationship = relationship.into();
        let path = match related_key {
            Some(related) => format!("{}({})/$ref", relationship, related),
            None => format!("{}/$ref", relationship),
        };
        Self::new(OperationKind::Disassociate)
            .collection(collection)
            .key(key)
            .additional_path(path)
    }

    /// Invoke a function. Parameters are passed as parameter aliases
    /// (`Name(p=@p1)?@p1=value`) so values never need escaping inside the path.
    pub fn function(name: impl Into<String>, parameters: Vec<(String, Value)>) -> Self {
        let (signature, aliases) = build_function_parameters(&parameters);
        let mut request = Self::new(OperationKind::CallFunction)
            .additional_path(format!("{}{}", name.into(), signature));
        request.unbound = true;
        request.query_params = aliases;
        request
    }

    /// Invoke an action with an optional JSON body
    pub fn action(name: impl Into<String>, data: Option<Value>) -> Self {
        let mut request = Self::new(OperationKind::CallAction).additional_path(name);
        request.unbound = true;
        request.data = data.map(Payload::Json);
        request
    }

    /// Run a FetchXML query against a collection
    pub fn fetch(collection: impl Into<String>, fetch_xml: impl Into<String>) -> Self {
        let mut request = Self::new(OperationKind::Fetch).collection(collection);
        request.fetch_xml = Some(fetch_xml.into());
        request
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn additional_path(mut self, path: impl Into<String>) -> Self {
        self.additional_path = Some(path.into());
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn order_by<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn expand(mut self, expand: Expand) -> Self {
        match &mut self.expand {
            Some(ExpandSpec::Items(items)) => items.push(expand),
            _ => self.expand = Some(ExpandSpec::Items(vec![expand])),
        }
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(Payload::Json(data));
        self
    }

    pub fn if_match(mut self, etag: impl Into<String>) -> Self {
        self.ifmatch = Some(etag.into());
        self
    }

    pub fn if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.ifnonematch = Some(etag.into());
        self
    }

    pub fn impersonate(mut self, user_id: impl Into<String>) -> Self {
        self.impersonate = Some(user_id.into());
        self
    }

    pub fn return_representation(mut self, enabled: bool) -> Self {
        self.return_representation = Some(enabled);
        self
    }

    pub fn content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Name used in diagnostic messages
    pub fn function_name(&self) -> &'static str {
        self.kind.function_name()
    }

    pub fn effective_method(&self) -> Method {
        self.method.unwrap_or_else(|| self.kind.default_method())
    }

    /// `key` wins over the deprecated `id`
    pub fn effective_key(&self) -> Option<&str> {
        self.key.as_deref().or(self.id.as_deref())
    }

    pub fn conditional(&self) -> Conditional {
        match (&self.ifmatch, &self.ifnonematch) {
            (Some(_), _) => Conditional::IfMatch,
            (None, Some(_)) => Conditional::IfNoneMatch,
            (None, None) => Conditional::None,
        }
    }

    /// Retrieve of a single-valued navigation reference (`select: ["x/$ref"]`)
    pub fn is_reference_retrieval(&self) -> bool {
        self.kind == OperationKind::Retrieve
            && self.select.len() == 1
            && self.select[0].ends_with("/$ref")
    }
}

/// Render function parameters as `(a=@p1,b=@p2)` plus `@p1=...` alias fragments.
///
/// Strings are quoted unless they are GUIDs or enum literals
/// (`Microsoft.Dynamics.CRM.*`); objects and arrays are sent as JSON.
fn build_function_parameters(parameters: &[(String, Value)]) -> (String, Vec<String>) {
    let mut signature = Vec::new();
    let mut aliases = Vec::new();

    for (index, (name, value)) in parameters.iter().enumerate() {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) => {
                if s.starts_with("Microsoft.Dynamics.CRM") {
                    s.clone()
                } else if super::validation::is_guid(s) {
                    super::validation::extract_guid(s).unwrap_or_else(|| s.clone())
                } else {
                    format!("'{}'", s.replace('\'', "''"))
                }
            }
            other => other.to_string(),
        };

        let alias = format!("@p{}", index + 1);
        signature.push(format!("{}={}", name, alias));
        aliases.push(format!(
            "{}={}",
            alias,
            super::query::encode_uri_component(&rendered)
        ));
    }

    (format!("({})", signature.join(",")), aliases)
}
