//! Transport and token seams
//!
//! The mapping layer never touches the network; it hands [`ComposedRequest`]s to
//! a [`Transport`] and reads back [`ResponseEnvelope`]s. [`ReqwestTransport`] is
//! the default implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;

use super::http::{ComposedRequest, RequestBody, ResponseBody, ResponseEnvelope};
use super::request::Method;
use crate::config::WebApiConfig;
use crate::error::{Error, Result};

/// Sends one composed request and returns the raw response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ComposedRequest) -> Result<ResponseEnvelope>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &ComposedRequest) -> Result<ResponseEnvelope> {
        (**self).send(request).await
    }
}

/// Supplies a bearer token before each physical call
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire_token(&self) -> Result<String>;
}

/// Token provider for a token obtained elsewhere
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// HTTP transport backed by `reqwest`. Performs no retries.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    data_api_url: String,
}

impl ReqwestTransport {
    pub fn new(config: &WebApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            data_api_url: config.data_api_url(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.data_api_url, path)
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ComposedRequest) -> Result<ResponseEnvelope> {
        let url = self.url_for(&request.path);
        trace!("{} {}", request.method, url);

        let mut builder = self.client.request(reqwest_method(request.method), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            Some(RequestBody::Binary(bytes)) => builder.body(bytes.clone()),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} {} failed: {}", request.method, url, e)))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {}", e)))?;
        let content_type = headers.get("content-type").map(String::as_str);
        let data = ResponseBody::from_bytes(bytes.to_vec(), status, content_type);

        trace!("{} {} -> {}", request.method, url, status);

        Ok(ResponseEnvelope {
            status,
            headers,
            data,
        })
    }
}
