//! Path and query-string composition
//!
//! Top level: `collection(key)/additional?opt1&opt2`. Structured expands are
//! composed by the same function with `;` as separator and wrapped as
//! `property(sub-options)`. Each recursion level works on a borrowed, read-only
//! view and returns its own fragment; nothing is shared between levels.

use super::{encode_uri_component, inject_paging, remove_guid_braces};
use crate::api::request::{Expand, ExpandSpec, OperationKind, Request};
use crate::api::validation::{
    array_parameter_check, guid_parameter_check, key_parameter_check, required_parameter_check,
    string_parameter_check,
};
use crate::config::WebApiConfig;
use crate::error::ParameterError;

/// Query-shaping options shared by requests and expands
struct QueryOptions<'a> {
    function_name: String,
    is_retrieve: bool,
    navigation_property: Option<&'a str>,
    navigation_property_key: Option<&'a str>,
    metadata_attribute_type: Option<&'a str>,
    select: &'a [String],
    filter: Option<&'a str>,
    field_name: Option<&'a str>,
    saved_query: Option<&'a str>,
    user_query: Option<&'a str>,
    apply: Option<&'a str>,
    count: bool,
    top: Option<u32>,
    order_by: &'a [String],
    partition_id: Option<&'a str>,
    download_size: Option<&'a str>,
    query_params: &'a [String],
    file_name: Option<&'a str>,
    expand: Option<&'a ExpandSpec>,
}

impl<'a> QueryOptions<'a> {
    fn from_request(request: &'a Request) -> Self {
        Self {
            function_name: request.function_name().to_string(),
            is_retrieve: request.kind == OperationKind::Retrieve,
            navigation_property: request.navigation_property.as_deref(),
            navigation_property_key: request.navigation_property_key.as_deref(),
            metadata_attribute_type: request.metadata_attribute_type.as_deref(),
            select: &request.select,
            filter: request.filter.as_deref(),
            field_name: request.field_name.as_deref(),
            saved_query: request.saved_query.as_deref(),
            user_query: request.user_query.as_deref(),
            apply: request.apply.as_deref(),
            count: request.count,
            top: request.top,
            order_by: &request.order_by,
            partition_id: request.partition_id.as_deref(),
            download_size: request.download_size.as_deref(),
            query_params: &request.query_params,
            file_name: request.file_name.as_deref(),
            expand: request.expand.as_ref(),
        }
    }

    fn from_expand(expand: &'a Expand, parent_function: &str) -> Self {
        Self {
            function_name: format!("{} $expand", parent_function),
            is_retrieve: false,
            navigation_property: None,
            navigation_property_key: None,
            metadata_attribute_type: None,
            select: &expand.select,
            filter: expand.filter.as_deref(),
            field_name: None,
            saved_query: None,
            user_query: None,
            apply: None,
            count: false,
            top: expand.top,
            order_by: &expand.order_by,
            partition_id: None,
            download_size: None,
            query_params: &[],
            file_name: None,
            expand: expand.expand.as_ref(),
        }
    }
}

/// Compose the data-API-relative path (with query string) for a request
pub fn compose_path(request: &Request, config: &WebApiConfig) -> Result<String, ParameterError> {
    let function_name = request.function_name();
    check_exclusive_options(request)?;

    if let Some(url) = &request.url {
        string_parameter_check(url, function_name, "request.url")?;
        // Next/delta links already carry their query options
        let base = config.data_api_url();
        return Ok(url.strip_prefix(base.as_str()).unwrap_or(url).to_string());
    }

    let content_reference = request
        .content_id
        .as_deref()
        .is_some_and(|id| id.starts_with('$'));
    if !request.unbound && !content_reference {
        required_parameter_check(request.collection.as_ref(), function_name, "request.collection")?;
    }

    let mut path = String::new();

    if let Some(content_id) = &request.content_id {
        string_parameter_check(content_id, function_name, "request.contentId")?;
        if content_id.starts_with('$') {
            path.push_str(content_id);
        }
    }

    if let Some(collection) = &request.collection {
        string_parameter_check(collection, function_name, "request.collection")?;
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(collection);

        if let Some(key) = request.effective_key() {
            let key = key_parameter_check(key, function_name, "request.key")?;
            path.push_str(&format!("({})", key));
        }
    }

    if let Some(additional) = &request.additional_path {
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(additional);
    }

    let mut path = compose_query(&QueryOptions::from_request(request), path, "&")?;

    if let Some(fetch_xml) = &request.fetch_xml {
        string_parameter_check(fetch_xml, function_name, "request.fetchXml")?;
        let fetch_xml = inject_paging(
            fetch_xml,
            request.page_number,
            request.paging_cookie.as_deref(),
            function_name,
        )?;
        let join = if path.contains('?') { '&' } else { '?' };
        path.push(join);
        path.push_str("fetchXml=");
        path.push_str(&encode_uri_component(&fetch_xml));
    }

    Ok(path)
}

fn check_exclusive_options(request: &Request) -> Result<(), ParameterError> {
    let function_name = request.function_name();

    if request.fetch_xml.is_some() {
        let conflicting = if !request.select.is_empty() {
            Some("request.select")
        } else if request.filter.is_some() {
            Some("request.filter")
        } else if !request.order_by.is_empty() {
            Some("request.orderBy")
        } else {
            None
        };
        if let Some(parameter) = conflicting {
            return Err(ParameterError::conflict(function_name, "request.fetchXml", parameter));
        }
    }

    if request.kind == OperationKind::Retrieve
        && request.select.len() > 1
        && request.select.iter().any(|column| column.ends_with("/$ref"))
    {
        return Err(ParameterError::invalid_type(
            function_name,
            "request.select",
            "Array with a single /$ref entry",
        ));
    }

    Ok(())
}

/// Append query options to `path`; `join` is `&` at top level and `;` inside expands
fn compose_query(
    options: &QueryOptions<'_>,
    mut path: String,
    join: &str,
) -> Result<String, ParameterError> {
    let function_name = options.function_name.as_str();
    let mut query: Vec<String> = Vec::new();

    if let Some(navigation) = options.navigation_property {
        string_parameter_check(navigation, function_name, "request.navigationProperty")?;
        path.push('/');
        path.push_str(navigation);

        if let Some(navigation_key) = options.navigation_property_key {
            let key = key_parameter_check(
                navigation_key,
                function_name,
                "request.navigationPropertyKey",
            )?;
            path.push_str(&format!("({})", key));
        }

        if navigation == "Attributes" {
            if let Some(attribute_type) = options.metadata_attribute_type {
                string_parameter_check(
                    attribute_type,
                    function_name,
                    "request.metadataAttributeType",
                )?;
                path.push('/');
                path.push_str(attribute_type);
            }
        }
    }

    if !options.select.is_empty() {
        array_parameter_check(options.select, function_name, "request.select")?;

        if options.is_retrieve
            && options.select.len() == 1
            && options.select[0].ends_with("/$ref")
        {
            path.push('/');
            path.push_str(&options.select[0]);
        } else {
            let mut columns = options.select;
            if options.is_retrieve && columns[0].starts_with('/') {
                if options.navigation_property.is_none() {
                    path.push_str(&columns[0]);
                }
                columns = &columns[1..];
            }
            if !columns.is_empty() {
                query.push(format!("$select={}", columns.join(",")));
            }
        }
    }

    if let Some(filter) = options.filter {
        string_parameter_check(filter, function_name, "request.filter")?;
        query.push(format!(
            "$filter={}",
            encode_uri_component(&remove_guid_braces(filter))
        ));
    }

    if let Some(field_name) = options.field_name {
        string_parameter_check(field_name, function_name, "request.fieldName")?;
        path.push('/');
        path.push_str(field_name);
    }

    if let Some(saved_query) = options.saved_query {
        let id = guid_parameter_check(saved_query, function_name, "request.savedQuery")?;
        query.push(format!("savedQuery={}", id));
    }

    if let Some(user_query) = options.user_query {
        let id = guid_parameter_check(user_query, function_name, "request.userQuery")?;
        query.push(format!("userQuery={}", id));
    }

    if let Some(apply) = options.apply {
        string_parameter_check(apply, function_name, "request.apply")?;
        query.push(format!("$apply={}", apply));
    }

    if options.count {
        query.push("$count=true".to_string());
    }

    if let Some(top) = options.top.filter(|top| *top > 0) {
        query.push(format!("$top={}", top));
    }

    if !options.order_by.is_empty() {
        array_parameter_check(options.order_by, function_name, "request.orderBy")?;
        query.push(format!("$orderby={}", options.order_by.join(",")));
    }

    if let Some(partition_id) = options.partition_id {
        string_parameter_check(partition_id, function_name, "request.partitionId")?;
        query.push(format!("partitionid='{}'", partition_id));
    }

    if let Some(size) = options.download_size {
        string_parameter_check(size, function_name, "request.downloadSize")?;
        query.push(format!("size={}", size));
    }

    if !options.query_params.is_empty() {
        array_parameter_check(options.query_params, function_name, "request.queryParams")?;
        query.push(options.query_params.join("&"));
    }

    if let Some(file_name) = options.file_name {
        string_parameter_check(file_name, function_name, "request.fileName")?;
        query.push(format!("x-ms-file-name={}", file_name));
    }

    match options.expand {
        Some(ExpandSpec::Raw(expand)) => {
            string_parameter_check(expand, function_name, "request.expand")?;
            query.push(format!("$expand={}", expand));
        }
        Some(ExpandSpec::Items(items)) => {
            let mut expanded = Vec::new();
            for item in items.iter().filter(|item| !item.property.is_empty()) {
                let nested = QueryOptions::from_expand(item, function_name);
                let sub_query = compose_query(&nested, String::new(), ";")?;
                if sub_query.is_empty() {
                    expanded.push(item.property.clone());
                } else {
                    expanded.push(format!("{}({})", item.property, sub_query));
                }
            }
            if !expanded.is_empty() {
                query.push(format!("$expand={}", expanded.join(",")));
            }
        }
        None => {}
    }

    if query.is_empty() {
        return Ok(path);
    }
    if join == "&" {
        path.push('?');
    }
    path.push_str(&query.join(join));
    Ok(path)
}
