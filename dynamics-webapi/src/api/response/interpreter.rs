//! Response interpreter

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::annotations::flatten_annotations;
use super::outcome::{Outcome, SkipValue, classify};
use super::paging::parse_paging_cookie;
use super::{ApiResult, EntityReference, RecordPage};
use crate::api::http::{ResponseBody, ResponseEnvelope};
use crate::api::request::{OperationKind, Request};
use crate::api::validation::extract_guid;
use crate::error::{RequestError, Result};

/// `collection(guid)` at the end of an entity URL
static ENTITY_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\w+)\(\{?([0-9a-f]{8}-?(?:[0-9a-f]{4}-?){3}[0-9a-f]{12})\}?\)")
        .expect("valid entity url regex")
});

const FETCH_PAGING_COOKIE: &str = "@Microsoft.Dynamics.CRM.fetchxmlpagingcookie";
const TOTAL_RECORD_COUNT: &str = "@Microsoft.Dynamics.CRM.totalrecordcount";
const TOTAL_RECORD_COUNT_LIMIT: &str = "@Microsoft.Dynamics.CRM.totalrecordcountlimitexceeded";
const MORE_RECORDS: &str = "@Microsoft.Dynamics.CRM.morerecords";

/// Interpret the response to `request`
pub fn interpret(response: &ResponseEnvelope, request: &Request) -> Result<ApiResult> {
    match classify(request.kind, request.conditional(), response.status) {
        Outcome::Success => Ok(interpret_success(response, request)),
        Outcome::SoftSkip(value) => {
            debug!(
                "{} skipped: precondition failed with status {}",
                request.function_name(),
                response.status
            );
            Ok(match value {
                SkipValue::False => ApiResult::Bool(false),
                SkipValue::Empty => ApiResult::Empty,
            })
        }
        Outcome::Propagate => Err(request_error(response).into()),
    }
}

fn request_error(response: &ResponseEnvelope) -> RequestError {
    match &response.data {
        ResponseBody::Json(body) => RequestError::from_body(response.status, Some(body)),
        ResponseBody::Text(text) => {
            RequestError::from_body(response.status, Some(&Value::String(text.clone())))
        }
        ResponseBody::Empty | ResponseBody::Binary(_) => {
            RequestError::from_body(response.status, None)
        }
    }
}

fn interpret_success(response: &ResponseEnvelope, request: &Request) -> ApiResult {
    match request.kind {
        OperationKind::Create | OperationKind::Upsert => match response.json() {
            Some(record) => ApiResult::Record(flatten_annotations(record)),
            None => entity_id(response).map_or(ApiResult::Empty, ApiResult::EntityId),
        },
        OperationKind::Update | OperationKind::UpdateSingleProperty => match response.json() {
            Some(record) => ApiResult::Record(flatten_annotations(record)),
            None => ApiResult::Bool(true),
        },
        OperationKind::Delete => ApiResult::Bool(true),
        OperationKind::Associate | OperationKind::Disassociate => ApiResult::Empty,
        OperationKind::Retrieve => interpret_retrieve(response, request),
        OperationKind::RetrieveMultiple => match response.json() {
            Some(body) => ApiResult::Page(build_page(body, request)),
            None => ApiResult::Page(RecordPage::default()),
        },
        OperationKind::Fetch => {
            let mut page = response
                .json()
                .map(|body| build_page(body, request))
                .unwrap_or_default();
            let cookie = response
                .json()
                .and_then(|body| body.get(FETCH_PAGING_COOKIE))
                .and_then(Value::as_str);
            page.paging_info = Some(parse_paging_cookie(
                cookie,
                request.page_number.unwrap_or(1),
            ));
            ApiResult::Page(page)
        }
        OperationKind::Count => interpret_count(response),
        OperationKind::CallFunction | OperationKind::CallAction | OperationKind::Execute => {
            interpret_generic(response)
        }
    }
}

fn interpret_retrieve(response: &ResponseEnvelope, request: &Request) -> ApiResult {
    let Some(body) = response.json() else {
        return interpret_generic(response);
    };

    if request.is_reference_retrieval() {
        if let Some(reference) = body
            .get("@odata.id")
            .and_then(Value::as_str)
            .and_then(parse_entity_url)
        {
            return ApiResult::Reference(EntityReference {
                odata_context: body
                    .get("@odata.context")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                ..reference
            });
        }
    }

    if body.get("value").is_some_and(Value::is_array) {
        return ApiResult::Page(build_page(body, request));
    }

    ApiResult::Record(flatten_annotations(body))
}

fn interpret_count(response: &ResponseEnvelope) -> ApiResult {
    let count = match &response.data {
        ResponseBody::Json(Value::Number(number)) => number.as_u64(),
        ResponseBody::Json(body) => body.get("@odata.count").and_then(Value::as_u64),
        ResponseBody::Text(text) => text.trim_start_matches('\u{feff}').trim().parse().ok(),
        ResponseBody::Empty | ResponseBody::Binary(_) => None,
    };
    ApiResult::Count(count.unwrap_or(0))
}

fn interpret_generic(response: &ResponseEnvelope) -> ApiResult {
    match &response.data {
        ResponseBody::Json(body) => ApiResult::Record(flatten_annotations(body)),
        ResponseBody::Text(text) => ApiResult::Text(text.clone()),
        ResponseBody::Binary(bytes) => ApiResult::Binary(bytes.clone()),
        ResponseBody::Empty => entity_id(response).map_or(ApiResult::Empty, ApiResult::EntityId),
    }
}

/// GUID of the record named by the `OData-EntityId` header
fn entity_id(response: &ResponseEnvelope) -> Option<String> {
    response.header("OData-EntityId").and_then(extract_guid)
}

/// `https://.../api/data/v9.2/systemusers(guid)` -> `{id, collection}`
fn parse_entity_url(url: &str) -> Option<EntityReference> {
    let caps = ENTITY_URL.captures_iter(url).last()?;
    Some(EntityReference {
        id: extract_guid(&caps[2])?,
        collection: caps[1].to_string(),
        odata_context: None,
    })
}

fn build_page(body: &Value, request: &Request) -> RecordPage {
    let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);

    let value = body
        .get("value")
        .and_then(Value::as_array)
        .map(|records| records.iter().map(flatten_annotations).collect())
        .unwrap_or_default();

    let mut odata_count = body.get("@odata.count").and_then(Value::as_u64);
    if request.count && odata_count.is_none() {
        odata_count = Some(0);
    }

    RecordPage {
        value,
        odata_context: text("@odata.context"),
        odata_next_link: text("@odata.nextLink"),
        odata_delta_link: text("@odata.deltaLink"),
        odata_count,
        paging_info: None,
        total_record_count: body.get(TOTAL_RECORD_COUNT).and_then(Value::as_u64),
        total_record_count_limit_exceeded: body
            .get(TOTAL_RECORD_COUNT_LIMIT)
            .and_then(Value::as_bool),
        more_records: body.get(MORE_RECORDS).and_then(Value::as_bool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    const GUID: &str = "8f2b6c1e-3a4d-4e5f-9a0b-1c2d3e4f5a6b";

    #[test]
    fn test_create_returns_entity_id() {
        let response = ResponseEnvelope::new(204).with_header(
            "odata-entityid",
            format!("https://org.crm.dynamics.com/api/data/v9.2/accounts({})", GUID.to_uppercase()),
        );
        let result = interpret(&response, &Request::create("accounts", json!({}))).unwrap();
        assert_eq!(result, ApiResult::EntityId(GUID.to_string()));
    }

    #[test]
    fn test_create_with_representation_returns_record() {
        let response = ResponseEnvelope::new(201).with_json(json!({
            "accountid": GUID,
            "statecode@OData.Community.Display.V1.FormattedValue": "Active"
        }));
        let result = interpret(&response, &Request::create("accounts", json!({}))).unwrap();
        let record = result.into_record().unwrap();
        assert_eq!(record["statecode_Formatted"], "Active");
    }

    #[test]
    fn test_update_soft_failure() {
        let request = Request::update("accounts", GUID, json!({"name": "x"})).if_match("*");

        let skipped = interpret(&ResponseEnvelope::new(412), &request).unwrap();
        assert_eq!(skipped, ApiResult::Bool(false));

        let failed = ResponseEnvelope::new(500).with_json(json!({
            "error": {"code": "0x80040216", "message": "An unexpected error occurred."}
        }));
        match interpret(&failed, &request) {
            Err(Error::Request(err)) => {
                assert_eq!(err.status, 500);
                assert_eq!(err.message, "An unexpected error occurred.");
            }
            other => panic!("expected request error, got {:?}", other),
        }

        let updated = interpret(&ResponseEnvelope::new(204), &request).unwrap();
        assert_eq!(updated, ApiResult::Bool(true));
    }

    #[test]
    fn test_upsert_soft_failures() {
        let prevent_update = Request::upsert("accounts", GUID, json!({})).if_none_match("*");
        assert_eq!(
            interpret(&ResponseEnvelope::new(412), &prevent_update).unwrap(),
            ApiResult::Empty
        );

        let prevent_create = Request::upsert("accounts", GUID, json!({})).if_match("*");
        assert_eq!(
            interpret(&ResponseEnvelope::new(404), &prevent_create).unwrap(),
            ApiResult::Empty
        );

        let plain = Request::upsert("accounts", GUID, json!({}));
        let err = interpret(&ResponseEnvelope::new(412), &plain).unwrap_err();
        assert_eq!(err.status(), Some(412));
    }

    #[test]
    fn test_delete_soft_failure() {
        let request = Request::delete("accounts", GUID).if_match("W/\"5\"");
        assert_eq!(
            interpret(&ResponseEnvelope::new(412), &request).unwrap(),
            ApiResult::Bool(false)
        );
        assert_eq!(
            interpret(&ResponseEnvelope::new(204), &request).unwrap(),
            ApiResult::Bool(true)
        );
    }

    #[test]
    fn test_reference_retrieval() {
        let request = Request::retrieve("accounts", GUID).select(["ownerid/$ref"]);
        let response = ResponseEnvelope::new(200).with_json(json!({
            "@odata.context": "https://org.crm.dynamics.com/api/data/v9.2/$metadata#$ref",
            "@odata.id": format!("https://org.crm.dynamics.com/api/data/v9.2/systemusers({})", GUID)
        }));

        match interpret(&response, &request).unwrap() {
            ApiResult::Reference(reference) => {
                assert_eq!(reference.id, GUID);
                assert_eq!(reference.collection, "systemusers");
                assert!(reference.odata_context.is_some());
            }
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_records_envelope() {
        let request = Request::retrieve_multiple("accounts").with_count();
        let response = ResponseEnvelope::new(200).with_json(json!({
            "@odata.context": "ctx",
            "@odata.nextLink": "https://org.crm.dynamics.com/api/data/v9.2/accounts?$skiptoken=x",
            "value": [{"name": "A"}, {"name": "B"}]
        }));

        let page = interpret(&response, &request).unwrap().into_page().unwrap();
        assert_eq!(page.value.len(), 2);
        assert_eq!(page.odata_context.as_deref(), Some("ctx"));
        assert!(page.odata_next_link.unwrap().ends_with("$skiptoken=x"));
        assert_eq!(page.odata_count, Some(0));
        assert_eq!(page.odata_delta_link, None);
    }

    #[test]
    fn test_delta_link_and_count() {
        let request = Request::retrieve_multiple("accounts").with_count();
        let response = ResponseEnvelope::new(200).with_json(json!({
            "@odata.count": 42,
            "@odata.deltaLink": "accounts?$deltatoken=1",
            "@Microsoft.Dynamics.CRM.totalrecordcount": 5000,
            "@Microsoft.Dynamics.CRM.totalrecordcountlimitexceeded": true,
            "value": []
        }));

        let page = interpret(&response, &request).unwrap().into_page().unwrap();
        assert_eq!(page.odata_count, Some(42));
        assert_eq!(page.odata_delta_link.as_deref(), Some("accounts?$deltatoken=1"));
        assert_eq!(page.total_record_count, Some(5000));
        assert_eq!(page.total_record_count_limit_exceeded, Some(true));
    }

    #[test]
    fn test_fetch_paging_info() {
        let mut request = Request::fetch("accounts", "<fetch/>");
        request.page_number = Some(1);
        let response = ResponseEnvelope::new(200).with_json(json!({
            "@Microsoft.Dynamics.CRM.fetchxmlpagingcookie":
                "<cookie pagenumber=\"2\" pagingcookie=\"%253ccookie%2520page%253d%25221%2522%253e%253c%252fcookie%253e\" />",
            "@Microsoft.Dynamics.CRM.morerecords": true,
            "value": [{"name": "A"}]
        }));

        let page = interpret(&response, &request).unwrap().into_page().unwrap();
        let paging = page.paging_info.unwrap();
        assert_eq!(paging.page, 1);
        assert_eq!(paging.next_page, 2);
        assert_eq!(paging.cookie, "&lt;cookie page=&quot;1&quot;&gt;&lt;/cookie&gt;");
        assert_eq!(page.more_records, Some(true));
    }

    #[test]
    fn test_count_forms() {
        let request = Request::count("accounts");
        assert_eq!(
            interpret(&ResponseEnvelope::new(200).with_json(json!(17)), &request).unwrap(),
            ApiResult::Count(17)
        );
        assert_eq!(
            interpret(&ResponseEnvelope::new(200).with_text("\u{feff}17"), &request).unwrap(),
            ApiResult::Count(17)
        );
        assert_eq!(
            interpret(
                &ResponseEnvelope::new(200).with_json(json!({"@odata.count": 3, "value": []})),
                &request
            )
            .unwrap(),
            ApiResult::Count(3)
        );
    }

    #[test]
    fn test_range_download_keeps_bytes() {
        let mut request =
            Request::retrieve("annotations", GUID).additional_path("documentbody/$value");
        request.range = Some("bytes=0-1".into());
        let response = ResponseEnvelope::new(206)
            .with_header("Content-Range", "bytes 0-1/4")
            .with_bytes(vec![0xff, 0x00]);

        let result = interpret(&response, &request).unwrap();

        assert_eq!(result.into_bytes(), Some(vec![0xff, 0x00]));
    }

    #[test]
    fn test_error_without_body() {
        let err = interpret(&ResponseEnvelope::new(404), &Request::retrieve("accounts", GUID))
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            err.to_string(),
            "request failed with status 404: Unexpected response status 404"
        );
    }
}
