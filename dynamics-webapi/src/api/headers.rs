//! Header composition and Prefer negotiation

use std::collections::BTreeMap;

use super::request::{Payload, Request};
use super::validation::guid_parameter_check;
use crate::config::WebApiConfig;
use crate::error::ParameterError;

const RETURN_REPRESENTATION: &str = "return=representation";
const INCLUDE_ANNOTATIONS: &str = "odata.include-annotations";
const MAX_PAGE_SIZE: &str = "odata.maxpagesize";
const TRACK_CHANGES: &str = "odata.track-changes";
const CONTINUE_ON_ERROR: &str = "odata.continue-on-error";

/// Prefer values recognized in an explicit `prefer` string or list
#[derive(Debug, Default)]
struct PreferTokens {
    return_representation: bool,
    include_annotations: Option<String>,
    max_page_size: Option<u32>,
    track_changes: bool,
    continue_on_error: bool,
}

impl PreferTokens {
    fn parse(request: &Request) -> Self {
        let mut parsed = Self::default();
        let Some(prefer) = &request.prefer else {
            return parsed;
        };

        for token in prefer.tokens() {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (token.as_str(), None),
            };

            match (name, value) {
                ("return", Some("representation")) => parsed.return_representation = true,
                (INCLUDE_ANNOTATIONS, Some(value)) => {
                    parsed.include_annotations = Some(value.to_string())
                }
                (MAX_PAGE_SIZE, Some(value)) => parsed.max_page_size = value.parse().ok(),
                (TRACK_CHANGES, None) => parsed.track_changes = true,
                (CONTINUE_ON_ERROR, None) => parsed.continue_on_error = true,
                // Unrecognized preferences are not forwarded
                _ => {}
            }
        }

        parsed
    }
}

/// Build the `Prefer` header value, or `None` when no preference is in effect.
///
/// Precedence: explicit request fields, then tokens from `request.prefer`, then
/// configuration defaults.
pub fn compose_prefer(request: &Request, config: &WebApiConfig) -> Option<String> {
    let tokens = PreferTokens::parse(request);
    let mut prefer = Vec::new();

    let return_representation = request
        .return_representation
        .unwrap_or(tokens.return_representation || config.return_representation);
    if return_representation {
        prefer.push(RETURN_REPRESENTATION.to_string());
    }

    let include_annotations = request
        .include_annotations
        .as_deref()
        .or(tokens.include_annotations.as_deref())
        .or(config.include_annotations.as_deref());
    if let Some(annotations) = include_annotations.filter(|a| !a.is_empty()) {
        prefer.push(format!("{}=\"{}\"", INCLUDE_ANNOTATIONS, annotations));
    }

    let max_page_size = request
        .max_page_size
        .or(tokens.max_page_size)
        .or(config.max_page_size);
    if let Some(size) = max_page_size.filter(|size| *size > 0) {
        prefer.push(format!("{}={}", MAX_PAGE_SIZE, size));
    }

    if request.track_changes || tokens.track_changes {
        prefer.push(TRACK_CHANGES.to_string());
    }

    if request.continue_on_error || tokens.continue_on_error {
        prefer.push(CONTINUE_ON_ERROR.to_string());
    }

    if prefer.is_empty() {
        None
    } else {
        Some(prefer.join(","))
    }
}

/// Compose the full header map for a request
pub fn compose_headers(
    request: &Request,
    config: &WebApiConfig,
) -> Result<BTreeMap<String, String>, ParameterError> {
    let function_name = request.function_name();
    let mut headers = BTreeMap::new();

    let accept = if is_metadata_request(request) {
        "application/xml"
    } else {
        "application/json"
    };
    headers.insert("Accept".into(), accept.into());
    headers.insert("OData-MaxVersion".into(), "4.0".into());
    headers.insert("OData-Version".into(), "4.0".into());

    let binary = request.content_range.is_some()
        || matches!(request.data, Some(Payload::Binary(_)));
    let content_type = if binary {
        "application/octet-stream"
    } else {
        "application/json; charset=utf-8"
    };
    headers.insert("Content-Type".into(), content_type.into());

    if let Some(prefer) = compose_prefer(request, config) {
        headers.insert("Prefer".into(), prefer);
    }

    match (&request.ifmatch, &request.ifnonematch) {
        (Some(_), Some(_)) => {
            return Err(ParameterError::conflict(
                function_name,
                "request.ifmatch",
                "request.ifnonematch",
            ));
        }
        (Some(etag), None) => {
            headers.insert("If-Match".into(), etag.clone());
        }
        (None, Some(etag)) => {
            headers.insert("If-None-Match".into(), etag.clone());
        }
        (None, None) => {}
    }

    if let Some(caller) = request.impersonate.as_ref().or(config.impersonate.as_ref()) {
        let id = guid_parameter_check(caller, function_name, "request.impersonate")?;
        headers.insert("MSCRMCallerID".into(), id);
    }

    if let Some(object_id) = request
        .impersonate_aad
        .as_ref()
        .or(config.impersonate_aad.as_ref())
    {
        let id = guid_parameter_check(object_id, function_name, "request.impersonateAAD")?;
        headers.insert("CallerObjectId".into(), id);
    }

    if request.duplicate_detection {
        headers.insert("MSCRM.SuppressDuplicateDetection".into(), "false".into());
    }
    if request.bypass_custom_plugin_execution {
        headers.insert("MSCRM.BypassCustomPluginExecution".into(), "true".into());
    }
    if request.no_cache {
        headers.insert("Cache-Control".into(), "no-cache".into());
    }
    if request.merge_labels {
        headers.insert("MSCRM.MergeLabels".into(), "true".into());
    }

    if let Some(content_id) = request.content_id.as_ref().filter(|id| !id.starts_with('$')) {
        headers.insert("Content-ID".into(), content_id.clone());
    }

    if let Some(range) = &request.content_range {
        headers.insert("Content-Range".into(), range.clone());
    }
    if let Some(range) = &request.range {
        headers.insert("Range".into(), range.clone());
    }
    if request.chunked_transfer {
        headers.insert("x-ms-transfer-mode".into(), "chunked".into());
    }

    Ok(merge_caller_headers(&request.headers, headers))
}

/// Caller headers first, replaced by any composed header of the same name in any case
fn merge_caller_headers(
    caller: &BTreeMap<String, String>,
    composed: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = caller
        .iter()
        .filter(|(name, _)| !composed.keys().any(|key| key.eq_ignore_ascii_case(name)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    merged.extend(composed);
    merged
}

fn is_metadata_request(request: &Request) -> bool {
    let ends_with_metadata = |s: &Option<String>| {
        s.as_deref()
            .is_some_and(|value| value.split('?').next().is_some_and(|p| p.ends_with("$metadata")))
    };
    ends_with_metadata(&request.collection)
        || ends_with_metadata(&request.additional_path)
        || ends_with_metadata(&request.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::request::Prefer;
    use serde_json::json;

    const GUID: &str = "8f2b6c1e-3a4d-4e5f-9a0b-1c2d3e4f5a6b";

    fn config() -> WebApiConfig {
        WebApiConfig::new("https://org.crm.dynamics.com")
    }

    #[test]
    fn test_standard_headers() {
        let headers = compose_headers(&Request::retrieve_multiple("accounts"), &config()).unwrap();
        assert_eq!(headers["Accept"], "application/json");
        assert_eq!(headers["OData-Version"], "4.0");
        assert_eq!(headers["OData-MaxVersion"], "4.0");
        assert_eq!(headers["Content-Type"], "application/json; charset=utf-8");
        assert!(!headers.contains_key("Prefer"));
    }

    #[test]
    fn test_binary_upload_content_type() {
        let mut request = Request::new(crate::api::request::OperationKind::Execute);
        request.content_range = Some("bytes 0-1023/4096".into());
        let headers = compose_headers(&request, &config()).unwrap();
        assert_eq!(headers["Content-Type"], "application/octet-stream");
        assert_eq!(headers["Content-Range"], "bytes 0-1023/4096");
    }

    #[test]
    fn test_metadata_accepts_xml() {
        let mut request = Request::new(crate::api::request::OperationKind::Execute);
        request.collection = Some("$metadata".into());
        let headers = compose_headers(&request, &config()).unwrap();
        assert_eq!(headers["Accept"], "application/xml");
    }

    #[test]
    fn test_conditional_headers_are_exclusive() {
        let request = Request::update("accounts", GUID, json!({})).if_match("*");
        let headers = compose_headers(&request, &config()).unwrap();
        assert_eq!(headers["If-Match"], "*");

        let request = request.if_none_match("*");
        let err = compose_headers(&request, &config()).unwrap_err();
        assert_eq!(
            err.message,
            "update. Either one of request.ifmatch or request.ifnonematch parameters should be used in a call, not both."
        );
    }

    #[test]
    fn test_prefer_precedence() {
        let config = WebApiConfig::builder("https://org.crm.dynamics.com")
            .include_annotations("*")
            .max_page_size(500)
            .return_representation(true)
            .build();

        let mut request = Request::retrieve_multiple("accounts");
        request.prefer = Some(Prefer::Text(
            "odata.maxpagesize=50, odata.include-annotations=\"OData.Community.Display.V1.FormattedValue\"".into(),
        ));
        request.max_page_size = Some(10);
        request.return_representation = Some(false);

        assert_eq!(
            compose_prefer(&request, &config).as_deref(),
            Some("odata.include-annotations=\"OData.Community.Display.V1.FormattedValue\",odata.maxpagesize=10")
        );

        let plain = Request::retrieve_multiple("accounts");
        assert_eq!(
            compose_prefer(&plain, &config).as_deref(),
            Some("return=representation,odata.include-annotations=\"*\",odata.maxpagesize=500")
        );
    }

    #[test]
    fn test_prefer_tokens_from_list() {
        let mut request = Request::retrieve_multiple("accounts");
        request.prefer = Some(Prefer::List(vec![
            "return=representation".into(),
            "odata.track-changes,odata.track-changes".into(),
            "unknown-token".into(),
        ]));

        assert_eq!(
            compose_prefer(&request, &config()).as_deref(),
            Some("return=representation,odata.track-changes")
        );
    }

    #[test]
    fn test_zero_page_size_is_not_sent() {
        let mut request = Request::retrieve_multiple("accounts");
        request.max_page_size = Some(0);
        assert_eq!(compose_prefer(&request, &config()), None);
    }

    #[test]
    fn test_impersonation_headers() {
        let config = WebApiConfig::builder("https://org.crm.dynamics.com")
            .impersonate_aad(format!("{{{}}}", GUID.to_uppercase()))
            .build();
        let request = Request::retrieve_multiple("accounts").impersonate(GUID.replace('-', ""));

        let headers = compose_headers(&request, &config).unwrap();
        assert_eq!(headers["MSCRMCallerID"], GUID);
        assert_eq!(headers["CallerObjectId"], GUID);

        let request = Request::retrieve_multiple("accounts").impersonate("someone");
        let err = compose_headers(&request, &config).unwrap_err();
        assert_eq!(err.parameter_name, "request.impersonate");
    }

    #[test]
    fn test_boolean_headers_and_content_id() {
        let mut request = Request::create("accounts", json!({"name": "x"})).content_id("1");
        request.duplicate_detection = true;
        request.bypass_custom_plugin_execution = true;
        request.no_cache = true;
        request.merge_labels = true;

        let headers = compose_headers(&request, &config()).unwrap();
        assert_eq!(headers["MSCRM.SuppressDuplicateDetection"], "false");
        assert_eq!(headers["MSCRM.BypassCustomPluginExecution"], "true");
        assert_eq!(headers["Cache-Control"], "no-cache");
        assert_eq!(headers["MSCRM.MergeLabels"], "true");
        assert_eq!(headers["Content-ID"], "1");

        let request = Request::create("leads", json!({})).content_id("$1");
        let headers = compose_headers(&request, &config()).unwrap();
        assert!(!headers.contains_key("Content-ID"));
    }

    #[test]
    fn test_composed_headers_override_caller_headers() {
        let request = Request::retrieve_multiple("accounts")
            .header("Accept", "text/plain")
            .header("content-type", "text/plain")
            .header("PREFER", "odata.track-changes")
            .header("X-Custom", "1")
            .return_representation(true);
        let headers = compose_headers(&request, &config()).unwrap();

        assert_eq!(headers["Accept"], "application/json");
        assert_eq!(headers["Content-Type"], "application/json; charset=utf-8");
        assert_eq!(headers["Prefer"], "return=representation");
        assert_eq!(headers["X-Custom"], "1");
        assert!(!headers.contains_key("content-type"));
        assert!(!headers.contains_key("PREFER"));
        assert_eq!(headers.len(), 6);
    }

    #[test]
    fn test_headers_are_deterministic() {
        let request = Request::update("accounts", GUID, json!({"name": "x"}))
            .if_match("W/\"1\"")
            .return_representation(true);
        assert_eq!(
            compose_headers(&request, &config()).unwrap(),
            compose_headers(&request, &config()).unwrap()
        );
    }
}
