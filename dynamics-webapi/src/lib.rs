//! Client-side mapping layer for the Dynamics 365 / Dataverse Web API
//!
//! Composes OData paths, query options, headers and `$batch` bodies from a
//! semantic [`api::Request`], and interprets responses into [`api::ApiResult`]s.
//! Networking and token acquisition are supplied through [`api::Transport`] and
//! [`api::TokenProvider`].

pub mod api;
pub mod config;
pub mod error;

pub use api::{ApiResult, Request, WebApiClient};
pub use config::WebApiConfig;
pub use error::{Error, ParameterError, RequestError, Result};
