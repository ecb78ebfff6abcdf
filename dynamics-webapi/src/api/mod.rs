//! Dataverse Web API mapping layer
//!
//! Requests are described semantically ([`Request`]), composed into plain HTTP
//! shapes ([`ComposedRequest`]), optionally gathered into a `$batch`, sent
//! through a [`Transport`], and the [`ResponseEnvelope`] is interpreted back
//! into an [`ApiResult`].

pub mod client;
pub mod collection_names;
pub mod composer;
pub mod headers;
pub mod http;
pub mod operations;
pub mod payload;
pub mod query;
pub mod request;
pub mod response;
pub mod transport;
pub mod validation;

pub use client::{BatchRequestBuilder, WebApiClient};
pub use collection_names::{CollectionNameResolver, EntityNameCache};
pub use composer::RequestComposer;
pub use headers::{compose_headers, compose_prefer};
pub use http::{ComposedRequest, RequestBody, ResponseBody, ResponseEnvelope};
pub use operations::{BatchEnvelope, convert_to_batch, parse_batch_response};
pub use payload::{BindQualifier, PayloadVisitor, Visit, serialize_payload};
pub use query::compose_path;
pub use request::{
    Conditional, Expand, ExpandSpec, Method, OperationKind, Payload, Prefer, Request,
};
pub use response::{
    ApiResult, EntityReference, Outcome, PagingInfo, RecordPage, SkipValue, classify, interpret,
};
pub use transport::{ReqwestTransport, StaticTokenProvider, TokenProvider, Transport};
