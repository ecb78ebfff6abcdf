//! Web API configuration with builder pattern
//!
//! Holds the server URL, data API path/version and the defaults that shape
//! composed requests (Prefer values, impersonation, entity-name resolution,
//! timeout). Can be built in code, loaded from a TOML file, or read from
//! `DYNAMICS_*` environment variables (a `.env` file is honoured).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Path and version of one Web API endpoint family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub path: String,
    pub version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            path: "data".to_string(),
            version: "9.2".to_string(),
        }
    }
}

/// Global configuration consumed by the composers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WebApiConfig {
    /// Organization URL, e.g. `https://contoso.crm4.dynamics.com`
    pub server_url: String,
    pub data_api: ApiConfig,
    /// Default caller id (systemuserid) sent as `MSCRMCallerID`
    pub impersonate: Option<String>,
    /// Default Entra ID object id sent as `CallerObjectId`
    pub impersonate_aad: Option<String>,
    pub include_annotations: Option<String>,
    pub max_page_size: Option<u32>,
    pub return_representation: bool,
    /// Resolve entity logical names to collection names in paths and `@odata.bind`
    pub use_entity_names: bool,
    pub timeout_ms: Option<u64>,
}

impl WebApiConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    pub fn builder(server_url: impl Into<String>) -> WebApiConfigBuilder {
        WebApiConfigBuilder::new(server_url)
    }

    /// `https://org.crm.dynamics.com/api/data/v9.2/`
    pub fn data_api_url(&self) -> String {
        format!(
            "{}/api/{}/v{}/",
            self.server_url.trim_end_matches('/'),
            self.data_api.path.trim_matches('/'),
            self.data_api.version
        )
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse Web API configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Read configuration from `DYNAMICS_*` environment variables, loading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("DYNAMICS_SERVER_URL")
            .context("DYNAMICS_SERVER_URL is not set")?;

        let mut config = Self::new(server_url);

        if let Some(version) = lookup("DYNAMICS_API_VERSION") {
            config.data_api.version = version;
        }
        config.impersonate = lookup("DYNAMICS_IMPERSONATE");
        config.impersonate_aad = lookup("DYNAMICS_IMPERSONATE_AAD");
        config.include_annotations = lookup("DYNAMICS_INCLUDE_ANNOTATIONS");
        config.max_page_size = lookup("DYNAMICS_MAX_PAGE_SIZE")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("DYNAMICS_MAX_PAGE_SIZE must be a positive integer")?;
        config.return_representation = parse_flag(lookup("DYNAMICS_RETURN_REPRESENTATION"));
        config.use_entity_names = parse_flag(lookup("DYNAMICS_USE_ENTITY_NAMES"));
        config.timeout_ms = lookup("DYNAMICS_TIMEOUT_MS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("DYNAMICS_TIMEOUT_MS must be a number of milliseconds")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            anyhow::bail!("server_url must be set");
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            anyhow::bail!("server_url must be an http(s) URL: {}", self.server_url);
        }
        Ok(())
    }
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// Builder for WebApiConfig
#[derive(Debug)]
pub struct WebApiConfigBuilder {
    config: WebApiConfig,
}

impl WebApiConfigBuilder {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            config: WebApiConfig::new(server_url),
        }
    }

    /// Set the data API version (default `9.2`)
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.config.data_api.version = version.into();
        self
    }

    pub fn impersonate(mut self, user_id: impl Into<String>) -> Self {
        self.config.impersonate = Some(user_id.into());
        self
    }

    pub fn impersonate_aad(mut self, object_id: impl Into<String>) -> Self {
        self.config.impersonate_aad = Some(object_id.into());
        self
    }

    /// Default `odata.include-annotations` value, e.g. `*`
    pub fn include_annotations(mut self, annotations: impl Into<String>) -> Self {
        self.config.include_annotations = Some(annotations.into());
        self
    }

    pub fn max_page_size(mut self, size: u32) -> Self {
        self.config.max_page_size = Some(size);
        self
    }

    pub fn return_representation(mut self, enabled: bool) -> Self {
        self.config.return_representation = enabled;
        self
    }

    pub fn use_entity_names(mut self, enabled: bool) -> Self {
        self.config.use_entity_names = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn build(self) -> WebApiConfig {
        self.config
    }
}
