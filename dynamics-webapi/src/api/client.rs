//! Web API client
//!
//! Thin delegation over the mapping layer: every operation builds a [`Request`],
//! composes it (failing before any I/O on bad parameters), sends it through the
//! [`Transport`] and interprets the response.

use std::sync::Arc;

use log::{debug, trace, warn};
use serde_json::Value;

use super::collection_names::CollectionNameResolver;
use super::composer::RequestComposer;
use super::http::{ComposedRequest, RequestBody, ResponseBody, ResponseEnvelope};
use super::operations::{convert_to_batch, parse_batch_response};
use super::request::{Method, OperationKind, Request};
use super::response::{ApiResult, RecordPage, interpret};
use super::transport::{TokenProvider, Transport};
use crate::config::WebApiConfig;
use crate::error::{Error, RequestError, Result};

/// Client for one Dataverse organization
pub struct WebApiClient<T: Transport> {
    config: WebApiConfig,
    transport: T,
    token_provider: Option<Arc<dyn TokenProvider>>,
    resolver: Option<Arc<dyn CollectionNameResolver>>,
}

impl<T: Transport> WebApiClient<T> {
    pub fn new(config: WebApiConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            token_provider: None,
            resolver: None,
        }
    }

    pub fn with_token_provider(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.token_provider = Some(Arc::new(provider));
        self
    }

    /// Used for collection names and `@odata.bind` values when `use_entity_names` is on
    pub fn with_collection_resolver(
        mut self,
        resolver: impl CollectionNameResolver + 'static,
    ) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn config(&self) -> &WebApiConfig {
        &self.config
    }

    /// Compose without sending
    pub fn compose(&self, request: &Request) -> Result<ComposedRequest> {
        RequestComposer::new(&self.config)
            .with_resolver(self.resolver.as_deref())
            .compose(request)
    }

    async fn send(&self, composed: &ComposedRequest) -> Result<ResponseEnvelope> {
        debug!("{} {}", composed.method, composed.path);

        let response = match &self.token_provider {
            Some(provider) => {
                let token = provider.acquire_token().await?;
                self.transport.send(&composed.with_bearer_token(&token)).await?
            }
            None => self.transport.send(composed).await?,
        };

        trace!("{} {} -> {}", composed.method, composed.path, response.status);
        Ok(response)
    }

    /// Run any request and interpret its response
    pub async fn execute(&self, request: &Request) -> Result<ApiResult> {
        let composed = self.compose(request)?;
        let response = self.send(&composed).await?;
        interpret(&response, request)
    }

    /// Create a record. Returns its id, or the record when a representation was requested.
    pub async fn create(&self, collection: &str, data: Value) -> Result<ApiResult> {
        self.execute(&Request::create(collection, data)).await
    }

    pub async fn retrieve(
        &self,
        collection: &str,
        key: &str,
        select: &[&str],
    ) -> Result<ApiResult> {
        let request = Request::retrieve(collection, key).select(select.iter().copied());
        self.execute(&request).await
    }

    /// One page of a collection query
    pub async fn retrieve_multiple(&self, mut request: Request) -> Result<RecordPage> {
        request.kind = OperationKind::RetrieveMultiple;
        Ok(self
            .execute(&request)
            .await?
            .into_page()
            .unwrap_or_default())
    }

    /// Follow `@odata.nextLink` until the last page, concatenating records.
    /// The delta link of the final page is kept.
    pub async fn retrieve_all(&self, request: Request) -> Result<RecordPage> {
        let mut page = self.retrieve_multiple(request.clone()).await?;
        let mut records = std::mem::take(&mut page.value);

        while let Some(next_link) = page.odata_next_link.take() {
            trace!("Following next link after {} record(s)", records.len());
            let mut next = request.clone();
            next.url = Some(next_link);
            page = self.retrieve_multiple(next).await?;
            records.append(&mut page.value);
        }

        page.value = records;
        Ok(page)
    }

    /// Number of records in a collection, optionally filtered
    pub async fn count(&self, collection: &str, filter: Option<&str>) -> Result<u64> {
        let request = match filter {
            Some(filter) => Request::count(collection).filter(filter).with_count().top(1),
            None => Request::count(collection).additional_path("$count"),
        };
        Ok(self.execute(&request).await?.count().unwrap_or(0))
    }

    /// Update an existing record. `If-Match: *` is sent unless the caller set a
    /// conditional header, so a missing record is never created. Returns
    /// `Bool(false)` when the precondition failed.
    pub async fn update(&self, mut request: Request) -> Result<ApiResult> {
        request.kind = OperationKind::Update;
        if request.ifmatch.is_none() && request.ifnonematch.is_none() {
            request.ifmatch = Some("*".to_string());
        }
        self.execute(&request).await
    }

    pub async fn update_single_property(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        value: Value,
    ) -> Result<ApiResult> {
        self.execute(&Request::update_single_property(collection, key, field, value))
            .await
    }

    pub async fn upsert(&self, mut request: Request) -> Result<ApiResult> {
        request.kind = OperationKind::Upsert;
        self.execute(&request).await
    }

    /// Delete a record. `false` when an `If-Match` precondition failed.
    pub async fn delete(&self, request: Request) -> Result<bool> {
        let mut request = request;
        request.kind = OperationKind::Delete;
        Ok(self.execute(&request).await?.as_bool().unwrap_or(true))
    }

    pub async fn associate(
        &self,
        collection: &str,
        key: &str,
        relationship: &str,
        related_collection: &str,
        related_key: &str,
    ) -> Result<()> {
        let request =
            Request::associate(collection, key, relationship, related_collection, related_key);
        self.execute(&request).await.map(|_| ())
    }

    pub async fn disassociate(
        &self,
        collection: &str,
        key: &str,
        relationship: &str,
        related_key: Option<&str>,
    ) -> Result<()> {
        let request =
            Request::disassociate(collection, key, relationship, related_key.map(str::to_string));
        self.execute(&request).await.map(|_| ())
    }

    /// Call an unbound function; bind it with [`Request::function`] plus a collection and key
    pub async fn call_function(
        &self,
        name: &str,
        parameters: Vec<(String, Value)>,
    ) -> Result<ApiResult> {
        self.execute(&Request::function(name, parameters)).await
    }

    pub async fn call_action(&self, name: &str, data: Option<Value>) -> Result<ApiResult> {
        self.execute(&Request::action(name, data)).await
    }

    /// One page of a FetchXML query
    pub async fn fetch(
        &self,
        collection: &str,
        fetch_xml: &str,
        page_number: Option<u32>,
        paging_cookie: Option<&str>,
    ) -> Result<RecordPage> {
        let mut request = Request::fetch(collection, fetch_xml);
        request.page_number = page_number;
        request.paging_cookie = paging_cookie.map(str::to_string);
        Ok(self
            .execute(&request)
            .await?
            .into_page()
            .unwrap_or_default())
    }

    /// Page through a FetchXML query while the server reports more records
    pub async fn fetch_all(&self, collection: &str, fetch_xml: &str) -> Result<RecordPage> {
        let mut page_number = 1;
        let mut cookie: Option<String> = None;
        let mut records = Vec::new();

        loop {
            let mut page = self
                .fetch(collection, fetch_xml, Some(page_number), cookie.as_deref())
                .await?;
            records.append(&mut page.value);

            if page.more_records != Some(true) {
                page.value = records;
                return Ok(page);
            }

            let paging = page.paging_info.unwrap_or_default();
            page_number = paging.next_page.max(page_number + 1);
            cookie = Some(paging.cookie).filter(|c| !c.is_empty());
            trace!("Fetching page {} after {} record(s)", page_number, records.len());
        }
    }

    /// Collect requests for a single `$batch` call
    pub fn batch(&self) -> BatchRequestBuilder<'_, T> {
        BatchRequestBuilder {
            client: self,
            requests: Vec::new(),
        }
    }
}

/// Requests gathered between starting and executing a batch
pub struct BatchRequestBuilder<'a, T: Transport> {
    client: &'a WebApiClient<T>,
    requests: Vec<Request>,
}

impl<'a, T: Transport> BatchRequestBuilder<'a, T> {
    pub fn add(mut self, request: Request) -> Self {
        self.requests.push(request);
        self
    }

    pub fn push(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Compose the `$batch` call without sending it
    pub fn compose(&self) -> Result<ComposedRequest> {
        let composed = self
            .requests
            .iter()
            .map(|request| self.client.compose(request))
            .collect::<Result<Vec<_>>>()?;

        let config = self.client.config();
        let envelope = convert_to_batch(&composed, &config.data_api_url());

        let mut headers = envelope.headers;
        headers.insert("Accept".into(), "application/json".into());
        headers.insert("OData-MaxVersion".into(), "4.0".into());
        headers.insert("OData-Version".into(), "4.0".into());
        if self.requests.iter().any(|request| request.continue_on_error) {
            headers.insert("Prefer".into(), "odata.continue-on-error".into());
        }

        Ok(ComposedRequest {
            method: Method::Post,
            path: "$batch".to_string(),
            headers,
            body: Some(RequestBody::Binary(envelope.body)),
            is_async: true,
            timeout: config.timeout(),
            in_change_set: false,
        })
    }

    /// Send all requests in one call. Every request is composed first, so a
    /// parameter error in any of them aborts the batch before it is sent.
    /// Results come back in submission order.
    pub async fn execute(self) -> Result<Vec<Result<ApiResult>>> {
        if self.requests.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.compose()?;
        debug!("Executing batch of {} request(s)", self.requests.len());
        let response = self.client.send(&batch).await?;

        if !(200..300).contains(&response.status) {
            return Err(RequestError::from_body(response.status, response.json()).into());
        }

        let body = match &response.data {
            ResponseBody::Text(text) => text.clone(),
            ResponseBody::Json(json) => json.to_string(),
            ResponseBody::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ResponseBody::Empty => String::new(),
        };
        let parts = parse_batch_response(&body, response.header("Content-Type"))?;

        if parts.len() != self.requests.len() {
            // A failed changeset or a stopped batch answers with fewer parts
            warn!(
                "Batch returned {} response(s) for {} request(s)",
                parts.len(),
                self.requests.len()
            );
            return match parts.iter().find(|part| part.status >= 400) {
                Some(failed) => Err(RequestError::from_body(failed.status, failed.json()).into()),
                None => Err(Error::Batch(format!(
                    "expected {} responses, received {}",
                    self.requests.len(),
                    parts.len()
                ))),
            };
        }

        Ok(parts
            .iter()
            .zip(&self.requests)
            .map(|(part, request)| interpret(part, request))
            .collect())
    }
}
