//! Payload serialization
//!
//! JSON payloads are walked once before serialization. A [`PayloadVisitor`]
//! decides, per key, whether the value is kept, rewritten or dropped; the
//! default [`BindQualifier`] qualifies `@odata.bind` / `@odata.id` references
//! and strips annotation-only fields that came from earlier responses.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::collection_names::CollectionNameResolver;
use super::http::RequestBody;
use super::request::Payload;
use crate::error::Result;

static BRACED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\{([\w-]+)\}\)").expect("valid braced key regex"));

static ENTITY_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\w_]+)(\([\w-]+\))$").expect("valid entity reference regex"));

/// What to do with one object member during a payload walk
pub enum Visit {
    Keep,
    Replace(Value),
    Drop,
}

/// Key matcher / value rewriter applied to every object member, depth first
pub trait PayloadVisitor {
    fn visit(&self, key: &str, value: &Value) -> Visit;
}

/// Rebuild `value`, applying `visitor` to every member of every nested object
pub fn transform(value: &Value, visitor: &dyn PayloadVisitor) -> Value {
    match value {
        Value::Object(members) => {
            let mut result = Map::with_capacity(members.len());
            for (key, member) in members {
                match visitor.visit(key, member) {
                    Visit::Keep => {
                        result.insert(key.clone(), transform(member, visitor));
                    }
                    Visit::Replace(replacement) => {
                        result.insert(key.clone(), replacement);
                    }
                    Visit::Drop => {}
                }
            }
            Value::Object(result)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| transform(item, visitor)).collect())
        }
        other => other.clone(),
    }
}

/// Qualifies entity references and removes response-only annotation fields
pub struct BindQualifier<'a> {
    data_api_url: &'a str,
    resolver: Option<&'a dyn CollectionNameResolver>,
}

impl<'a> BindQualifier<'a> {
    pub fn new(data_api_url: &'a str) -> Self {
        Self {
            data_api_url,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn CollectionNameResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn qualify(&self, key: &str, reference: &str) -> String {
        let mut value = BRACED_KEY.replace_all(reference, "($1)").into_owned();

        if let Some(resolver) = self.resolver {
            if let Some(caps) = ENTITY_REFERENCE.captures(&value) {
                if let Some(collection) = resolver.resolve_collection_name(&caps[1]) {
                    let start = caps.get(1).map_or(0, |m| m.start());
                    value = format!("{}{}{}", &value[..start], collection, &caps[2]);
                }
            }
        }

        if value.starts_with(self.data_api_url) {
            return value;
        }

        if key.ends_with("@odata.bind") {
            if value.starts_with('/') {
                value
            } else {
                format!("/{}", value)
            }
        } else {
            format!("{}{}", self.data_api_url, value.trim_start_matches('/'))
        }
    }
}

impl PayloadVisitor for BindQualifier<'_> {
    fn visit(&self, key: &str, value: &Value) -> Visit {
        if key.starts_with("oData")
            || key.ends_with("_Formatted")
            || key.ends_with("_NavigationProperty")
            || key.ends_with("_LogicalName")
        {
            return Visit::Drop;
        }

        if key.ends_with("@odata.bind") || key.ends_with("@odata.id") {
            if let Value::String(reference) = value {
                if !reference.starts_with('$') {
                    return Visit::Replace(Value::String(self.qualify(key, reference)));
                }
            }
        }

        Visit::Keep
    }
}

/// Serialize a payload into a request body. JSON is qualified and escaped;
/// binary passes through unmodified.
pub fn serialize_payload(payload: &Payload, qualifier: &BindQualifier<'_>) -> Result<RequestBody> {
    match payload {
        Payload::Json(value) => {
            let qualified = transform(value, qualifier);
            let text = serde_json::to_string(&qualified)?;
            Ok(RequestBody::Text(escape_non_ascii(&text)))
        }
        Payload::Binary(bytes) => Ok(RequestBody::Binary(bytes.clone())),
    }
}

/// Escape every character from U+007F upward as `\uXXXX` (UTF-16 code units)
pub fn escape_non_ascii(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    let mut units = [0u16; 2];
    for ch in text.chars() {
        if (ch as u32) < 0x7f {
            escaped.push(ch);
            continue;
        }
        for unit in ch.encode_utf16(&mut units) {
            let _ = write!(escaped, "\\u{:04x}", unit);
        }
    }
    escaped
}
