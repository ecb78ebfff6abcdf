//! Request composition: path, headers and body in one pass

use std::borrow::Cow;
use std::time::Duration;

use super::collection_names::CollectionNameResolver;
use super::headers::compose_headers;
use super::http::ComposedRequest;
use super::payload::{BindQualifier, serialize_payload};
use super::query::compose_path;
use super::request::Request;
use crate::config::WebApiConfig;
use crate::error::Result;

/// Turns [`Request`]s into [`ComposedRequest`]s for one configuration
pub struct RequestComposer<'a> {
    config: &'a WebApiConfig,
    resolver: Option<&'a dyn CollectionNameResolver>,
}

impl<'a> RequestComposer<'a> {
    pub fn new(config: &'a WebApiConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    /// Resolve entity names through `resolver`; only consulted when
    /// `use_entity_names` is enabled in the configuration.
    pub fn with_resolver(mut self, resolver: Option<&'a dyn CollectionNameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    fn active_resolver(&self) -> Option<&'a dyn CollectionNameResolver> {
        self.resolver.filter(|_| self.config.use_entity_names)
    }

    /// Validate and compose one request. Fails with a parameter error before
    /// anything is sent.
    pub fn compose(&self, request: &Request) -> Result<ComposedRequest> {
        let request = self.resolve_collection(request);
        let path = compose_path(&request, self.config)?;
        let headers = compose_headers(&request, self.config)?;

        let data_api_url = self.config.data_api_url();
        let mut qualifier = BindQualifier::new(&data_api_url);
        if let Some(resolver) = self.active_resolver() {
            qualifier = qualifier.with_resolver(resolver);
        }
        let body = request
            .data
            .as_ref()
            .map(|payload| serialize_payload(payload, &qualifier))
            .transpose()?;

        Ok(ComposedRequest {
            method: request.effective_method(),
            path,
            headers,
            body,
            is_async: request.is_async.unwrap_or(true),
            timeout: request
                .timeout_ms
                .map(Duration::from_millis)
                .or_else(|| self.config.timeout()),
            in_change_set: request.in_change_set.unwrap_or(true),
        })
    }

    fn resolve_collection<'r>(&self, request: &'r Request) -> Cow<'r, Request> {
        let resolved = self.active_resolver().and_then(|resolver| {
            request
                .collection
                .as_deref()
                .and_then(|name| resolver.resolve_collection_name(name))
        });

        match resolved {
            Some(collection) if request.collection.as_deref() != Some(collection.as_str()) => {
                let mut owned = request.clone();
                owned.collection = Some(collection);
                Cow::Owned(owned)
            }
            _ => Cow::Borrowed(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::collection_names::EntityNameCache;
    use crate::api::http::RequestBody;
    use crate::api::request::Method;
    use serde_json::json;

    const GUID: &str = "8f2b6c1e-3a4d-4e5f-9a0b-1c2d3e4f5a6b";

    #[test]
    fn test_compose_create() {
        let config = WebApiConfig::new("https://org.crm.dynamics.com");
        let request = Request::create(
            "accounts",
            json!({
                "name": "Contoso",
                "primarycontactid@odata.bind": format!("contacts({})", GUID)
            }),
        );

        let composed = RequestComposer::new(&config).compose(&request).unwrap();
        assert_eq!(composed.method, Method::Post);
        assert_eq!(composed.path, "accounts");
        assert!(composed.is_async);
        assert!(composed.in_change_set);
        match composed.body {
            Some(RequestBody::Text(text)) => {
                let bind = format!("\"primarycontactid@odata.bind\":\"/contacts({})\"", GUID);
                assert!(text.contains(&bind))
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_falls_back_to_config() {
        let config = WebApiConfig::builder("https://org.crm.dynamics.com")
            .timeout(Duration::from_secs(20))
            .build();
        let composer = RequestComposer::new(&config);

        let composed = composer.compose(&Request::retrieve_multiple("accounts")).unwrap();
        assert_eq!(composed.timeout, Some(Duration::from_secs(20)));

        let request = Request::retrieve_multiple("accounts").timeout(Duration::from_secs(2));
        let composed = composer.compose(&request).unwrap();
        assert_eq!(composed.timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_entity_names_only_when_enabled() {
        let mut cache = EntityNameCache::new();
        cache.insert("account", "accounts");

        let config = WebApiConfig::new("https://org.crm.dynamics.com");
        let composed = RequestComposer::new(&config)
            .with_resolver(Some(&cache as &dyn CollectionNameResolver))
            .compose(&Request::retrieve_multiple("account"))
            .unwrap();
        assert_eq!(composed.path, "account");

        let config = WebApiConfig::builder("https://org.crm.dynamics.com")
            .use_entity_names(true)
            .build();
        let composed = RequestComposer::new(&config)
            .with_resolver(Some(&cache as &dyn CollectionNameResolver))
            .compose(&Request::retrieve_multiple("account"))
            .unwrap();
        assert_eq!(composed.path, "accounts");
    }

    #[test]
    fn test_parameter_errors_surface() {
        let config = WebApiConfig::new("https://org.crm.dynamics.com");
        let request = Request::update("accounts", GUID, json!({}))
            .if_match("*")
            .if_none_match("*");
        let err = RequestComposer::new(&config).compose(&request).unwrap_err();
        assert!(err.is_parameter_error());
    }
}
