//! Parameter validators
//!
//! Every check takes the diagnostic context `(function_name, parameter_name)` and
//! either returns normally or fails with a [`ParameterError`]. None of them do I/O.
//! The GUID and key checks return the normalized value that ends up in the URL.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::ParameterError;

/// 8-4-4-4-12 hex with optional hyphens; braces are ignored by matching inside them
static GUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-?(?:[0-9a-f]{4}-?){3}[0-9a-f]{12}").expect("valid GUID regex")
});

/// A value that is nothing but a GUID, braces allowed
static GUID_EXACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\{?[0-9a-f]{8}-?(?:[0-9a-f]{4}-?){3}[0-9a-f]{12}\}?$")
        .expect("valid GUID regex")
});

/// One alternate key pair: `attribute=value`
static ALTERNATE_KEY_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+=(.+)$").expect("valid alternate key regex"));

const KEY_TYPE: &str = "String representing GUID or Alternate Key";
const GUID_TYPE: &str = "GUID String";

/// JSON shapes accepted for loosely-typed request input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Array,
    Boolean,
    Number,
    StringOrArray,
    Object,
}

impl ParamType {
    fn label(&self) -> &'static str {
        match self {
            ParamType::String => "String",
            ParamType::Array => "Array",
            ParamType::Boolean => "Boolean",
            ParamType::Number => "Number",
            ParamType::StringOrArray => "String or Array",
            ParamType::Object => "Object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Array => value.is_array(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Number => value.is_number(),
            ParamType::StringOrArray => value.is_string() || value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// Check the JSON type of a loosely-typed parameter. `null` is treated as absent.
pub fn json_parameter_check(
    value: &Value,
    expected: ParamType,
    function_name: &str,
    parameter_name: &str,
) -> Result<(), ParameterError> {
    if value.is_null() || expected.accepts(value) {
        return Ok(());
    }
    Err(ParameterError::invalid_type(
        function_name,
        parameter_name,
        expected.label(),
    ))
}

/// A string parameter must carry something other than whitespace
pub fn string_parameter_check(
    value: &str,
    function_name: &str,
    parameter_name: &str,
) -> Result<(), ParameterError> {
    if value.trim().is_empty() {
        return Err(ParameterError::invalid_type(
            function_name,
            parameter_name,
            "String",
        ));
    }
    Ok(())
}

/// Every entry of an array parameter must be a non-empty string
pub fn array_parameter_check(
    values: &[String],
    function_name: &str,
    parameter_name: &str,
) -> Result<(), ParameterError> {
    if values.iter().any(|v| v.trim().is_empty()) {
        return Err(ParameterError::invalid_type(
            function_name,
            parameter_name,
            "Array",
        ));
    }
    Ok(())
}

/// Numeric parameters sent to the server must not be negative
pub fn number_parameter_check(
    value: i64,
    function_name: &str,
    parameter_name: &str,
) -> Result<(), ParameterError> {
    if value < 0 {
        return Err(ParameterError::invalid_type(
            function_name,
            parameter_name,
            "Number",
        ));
    }
    Ok(())
}

/// Fail when a required parameter is absent
pub fn required_parameter_check<T>(
    value: Option<&T>,
    function_name: &str,
    parameter_name: &str,
) -> Result<(), ParameterError> {
    match value {
        Some(_) => Ok(()),
        None => Err(ParameterError::missing(function_name, parameter_name)),
    }
}

/// Extract the first GUID found in `value`, in canonical hyphenated lowercase form
pub fn extract_guid(value: &str) -> Option<String> {
    let found = GUID_PATTERN.find(value)?;
    let hex: String = found.as_str().chars().filter(|c| *c != '-').collect();
    uuid::Uuid::parse_str(&hex)
        .ok()
        .map(|id| id.hyphenated().to_string())
}

/// Whether the whole value is a GUID
pub fn is_guid(value: &str) -> bool {
    GUID_EXACT.is_match(value.trim())
}

/// Validate a GUID parameter and return its canonical form
pub fn guid_parameter_check(
    value: &str,
    function_name: &str,
    parameter_name: &str,
) -> Result<String, ParameterError> {
    extract_guid(value)
        .ok_or_else(|| ParameterError::invalid_type(function_name, parameter_name, GUID_TYPE))
}

/// Validate a record key: either a GUID or an alternate key expression.
///
/// Alternate keys are `name='value'` pairs separated by commas. Each pair is trimmed
/// and double quotes are normalized to single quotes. Values containing commas are
/// not supported.
pub fn key_parameter_check(
    value: &str,
    function_name: &str,
    parameter_name: &str,
) -> Result<String, ParameterError> {
    let invalid = || ParameterError::invalid_type(function_name, parameter_name, KEY_TYPE);

    if value.trim().is_empty() {
        return Err(invalid());
    }

    // A GUID inside an alternate key value must not be mistaken for the key itself
    if !value.contains('=') {
        return extract_guid(value).ok_or_else(invalid);
    }

    let mut pairs = Vec::new();
    for pair in value.split(',') {
        let pair = pair.trim().replace('"', "'");
        if !ALTERNATE_KEY_PAIR.is_match(&pair) {
            return Err(invalid());
        }
        pairs.push(pair);
    }

    Ok(pairs.join(","))
}
