//! Error types for request composition and response interpretation
//!
//! Three outcomes can come out of a call:
//! - [`ParameterError`] - the request was malformed; raised before any I/O
//! - [`RequestError`] - the server answered with a status that was not reclassified
//! - a soft skip, which is not an error at all (see `api::response::outcome`)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for all Web API operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Request(#[from] RequestError),

    /// The transport failed before producing a response envelope
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The batch response could not be matched against the submitted requests
    #[error("batch error: {0}")]
    Batch(String),
}

impl Error {
    /// HTTP status carried by a request error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Request(e) => Some(e.status),
            _ => None,
        }
    }

    pub fn is_parameter_error(&self) -> bool {
        matches!(self, Error::Parameter(_))
    }
}

/// Contract violation detected while validating or composing a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParameterError {
    pub function_name: String,
    pub parameter_name: String,
    pub message: String,
}

impl ParameterError {
    /// `<function> requires the <parameter> parameter to be of type <type>`
    pub fn invalid_type(function_name: &str, parameter_name: &str, type_name: &str) -> Self {
        Self {
            function_name: function_name.to_string(),
            parameter_name: parameter_name.to_string(),
            message: format!(
                "{} requires the {} parameter to be of type {}",
                function_name, parameter_name, type_name
            ),
        }
    }

    /// `<function> requires the <parameter> parameter`
    pub fn missing(function_name: &str, parameter_name: &str) -> Self {
        Self {
            function_name: function_name.to_string(),
            parameter_name: parameter_name.to_string(),
            message: format!("{} requires the {} parameter", function_name, parameter_name),
        }
    }

    /// Two parameters that cannot be combined were both set
    pub fn conflict(function_name: &str, first: &str, second: &str) -> Self {
        Self {
            function_name: function_name.to_string(),
            parameter_name: first.to_string(),
            message: format!(
                "{}. Either one of {} or {} parameters should be used in a call, not both.",
                function_name, first, second
            ),
        }
    }
}

/// Non-success response from the Web API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("request failed with status {status}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct RequestError {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub innererror: Option<Value>,
}

impl RequestError {
    /// Build from the `{"error": {...}}` body Dataverse returns on failure.
    ///
    /// Falls back to the raw body text, then to a generic message, when the
    /// body has no structured error object.
    pub fn from_body(status: u16, body: Option<&Value>) -> Self {
        let error = body.and_then(|b| b.get("error"));

        let message = error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| body.and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("Unexpected response status {}", status));

        Self {
            status,
            message,
            code: error
                .and_then(|e| e.get("code"))
                .and_then(Value::as_str)
                .map(str::to_string),
            innererror: error.and_then(|e| e.get("innererror")).cloned(),
        }
    }
}
